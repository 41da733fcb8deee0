use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for one thread of execution.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct EventState {
    pub(crate) ops: EventOps,
    pub(crate) models: BTreeMap<String, ModelCounters>,
    pub(crate) tables: BTreeMap<String, u64>,
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventOps {
    // Storage round-trips
    pub store_fetches: u64,
    pub rows_fetched: u64,

    // Cache
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_invalidations: u64,

    // Mutations
    pub rows_written: u64,
    pub rows_created: u64,

    // Dispatch
    pub dispatch_calls: u64,
    pub dispatch_max_depth: u64,

    // Onchange
    pub onchange_calls: u64,
    pub onchange_routines: u64,
}

///
/// ModelCounters
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ModelCounters {
    pub rows_written: u64,
    pub rows_created: u64,
    pub dispatch_calls: u64,
    pub onchange_calls: u64,
}

///
/// EventReport
/// Point-in-time snapshot of the counters.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventReport {
    pub ops: EventOps,
    pub models: BTreeMap<String, ModelCounters>,

    /// Fetch round-trips per storage relation.
    pub tables: BTreeMap<String, u64>,
}

impl EventReport {
    /// Fetch round-trips recorded against one storage relation.
    #[must_use]
    pub fn fetches_for(&self, table: &str) -> u64 {
        self.tables.get(table).copied().unwrap_or(0)
    }
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with_borrow_mut(f)
}

pub(crate) fn report() -> EventReport {
    EVENT_STATE.with_borrow(|state| EventReport {
        ops: state.ops.clone(),
        models: state.models.clone(),
        tables: state.tables.clone(),
    })
}

pub(crate) fn reset_all() {
    EVENT_STATE.with_borrow_mut(|state| *state = EventState::default());
}
