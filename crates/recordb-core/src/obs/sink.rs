//! Metrics sink boundary.
//!
//! Runtime code never touches `obs::metrics` directly; every counter update
//! flows through `MetricsEvent` and `record`.
use crate::obs::metrics::{self, EventReport};
use std::cell::Cell;

thread_local! {
    static SINK_OVERRIDE: Cell<Option<&'static dyn MetricsSink>> = const { Cell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent<'a> {
    StoreFetch {
        table: &'a str,
        rows: u64,
    },
    CacheHit,
    CacheMiss,
    CacheInvalidate {
        entries: u64,
    },
    Write {
        model: &'a str,
        rows: u64,
    },
    Create {
        model: &'a str,
    },
    Dispatch {
        model: &'a str,
        method: &'a str,
        depth: u64,
    },
    Onchange {
        model: &'a str,
        routines: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

/// GlobalMetricsSink
/// Default sink that writes into the thread-local counters.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::StoreFetch { table, rows } => metrics::with_state_mut(|m| {
                m.ops.store_fetches = m.ops.store_fetches.saturating_add(1);
                m.ops.rows_fetched = m.ops.rows_fetched.saturating_add(rows);
                let entry = m.tables.entry(table.to_string()).or_default();
                *entry = entry.saturating_add(1);
            }),

            MetricsEvent::CacheHit => metrics::with_state_mut(|m| {
                m.ops.cache_hits = m.ops.cache_hits.saturating_add(1);
            }),

            MetricsEvent::CacheMiss => metrics::with_state_mut(|m| {
                m.ops.cache_misses = m.ops.cache_misses.saturating_add(1);
            }),

            MetricsEvent::CacheInvalidate { entries } => metrics::with_state_mut(|m| {
                m.ops.cache_invalidations = m.ops.cache_invalidations.saturating_add(entries);
            }),

            MetricsEvent::Write { model, rows } => metrics::with_state_mut(|m| {
                m.ops.rows_written = m.ops.rows_written.saturating_add(rows);
                let entry = m.models.entry(model.to_string()).or_default();
                entry.rows_written = entry.rows_written.saturating_add(rows);
            }),

            MetricsEvent::Create { model } => metrics::with_state_mut(|m| {
                m.ops.rows_created = m.ops.rows_created.saturating_add(1);
                let entry = m.models.entry(model.to_string()).or_default();
                entry.rows_created = entry.rows_created.saturating_add(1);
            }),

            MetricsEvent::Dispatch {
                model,
                method: _,
                depth,
            } => metrics::with_state_mut(|m| {
                m.ops.dispatch_calls = m.ops.dispatch_calls.saturating_add(1);
                m.ops.dispatch_max_depth = m.ops.dispatch_max_depth.max(depth);
                let entry = m.models.entry(model.to_string()).or_default();
                entry.dispatch_calls = entry.dispatch_calls.saturating_add(1);
            }),

            MetricsEvent::Onchange { model, routines } => metrics::with_state_mut(|m| {
                m.ops.onchange_calls = m.ops.onchange_calls.saturating_add(1);
                m.ops.onchange_routines = m.ops.onchange_routines.saturating_add(routines);
                let entry = m.models.entry(model.to_string()).or_default();
                entry.onchange_calls = entry.onchange_calls.saturating_add(1);
            }),
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

/// Route one event to the scoped override, or the global sink.
pub(crate) fn record(event: MetricsEvent<'_>) {
    match SINK_OVERRIDE.get() {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current thread's counters.
#[must_use]
pub fn metrics_report() -> EventReport {
    metrics::report()
}

/// Reset all counters for the current thread.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
pub fn with_metrics_sink<T>(sink: &'static dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<&'static dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.set(self.0);
        }
    }

    let prev = SINK_OVERRIDE.replace(Some(sink));
    let _guard = Guard(prev);

    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CapturingSink;

    thread_local! {
        static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    impl MetricsSink for CapturingSink {
        fn record(&self, event: MetricsEvent<'_>) {
            CAPTURED.with_borrow_mut(|events| events.push(format!("{event:?}")));
        }
    }

    static CAPTURING: CapturingSink = CapturingSink;

    #[test]
    fn global_sink_counts_fetches_per_table() {
        metrics_reset_all();
        record(MetricsEvent::StoreFetch {
            table: "user",
            rows: 3,
        });
        record(MetricsEvent::StoreFetch {
            table: "user",
            rows: 1,
        });
        record(MetricsEvent::StoreFetch {
            table: "tag",
            rows: 2,
        });

        let report = metrics_report();
        assert_eq!(report.ops.store_fetches, 3);
        assert_eq!(report.ops.rows_fetched, 6);
        assert_eq!(report.fetches_for("user"), 2);
        assert_eq!(report.fetches_for("tag"), 1);
        assert_eq!(report.fetches_for("post"), 0);
    }

    #[test]
    fn override_sink_intercepts_and_restores() {
        metrics_reset_all();
        with_metrics_sink(&CAPTURING, || record(MetricsEvent::CacheHit));
        record(MetricsEvent::CacheMiss);

        let captured = CAPTURED.with_borrow(Clone::clone);
        assert_eq!(captured, vec!["CacheHit".to_string()]);

        let report = metrics_report();
        assert_eq!(report.ops.cache_hits, 0, "override should bypass global counters");
        assert_eq!(report.ops.cache_misses, 1, "global sink should be restored");
    }
}
