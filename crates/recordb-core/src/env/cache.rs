use crate::{
    obs::sink::{self, MetricsEvent},
    value::{RecordId, Value},
};
use std::collections::HashMap;

type CacheKey = (&'static str, RecordId, &'static str);

///
/// Cache
///
/// Per-environment field values keyed by `(model, id, field)`.
///

#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<CacheKey, Value>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value, recording a hit or miss.
    pub fn get(&self, model: &'static str, id: RecordId, field: &'static str) -> Option<&Value> {
        let found = self.entries.get(&(model, id, field));
        sink::record(if found.is_some() {
            MetricsEvent::CacheHit
        } else {
            MetricsEvent::CacheMiss
        });

        found
    }

    #[must_use]
    pub fn contains(&self, model: &'static str, id: RecordId, field: &'static str) -> bool {
        self.entries.contains_key(&(model, id, field))
    }

    pub fn insert(&mut self, model: &'static str, id: RecordId, field: &'static str, value: Value) {
        self.entries.insert((model, id, field), value);
    }

    /// Drop `field` for each of `ids`.
    pub fn invalidate(&mut self, model: &str, ids: &[RecordId], field: &str) {
        let before = self.entries.len();
        self.entries
            .retain(|(m, id, f), _| !(*m == model && *f == field && ids.contains(id)));
        self.record_invalidation(before);
    }

    /// Drop `field` for every record of `model`.
    pub fn invalidate_field(&mut self, model: &str, field: &str) {
        let before = self.entries.len();
        self.entries.retain(|(m, _, f), _| !(*m == model && *f == field));
        self.record_invalidation(before);
    }

    /// Drop every field of the given records.
    pub fn evict_records(&mut self, model: &str, ids: &[RecordId]) {
        let before = self.entries.len();
        self.entries
            .retain(|(m, id, _), _| !(*m == model && ids.contains(id)));
        self.record_invalidation(before);
    }

    pub fn clear(&mut self) {
        let before = self.entries.len();
        self.entries.clear();
        self.record_invalidation(before);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record_invalidation(&self, before: usize) {
        let removed = before - self.entries.len();
        if removed > 0 {
            sink::record(MetricsEvent::CacheInvalidate {
                entries: u64::try_from(removed).unwrap_or(u64::MAX),
            });
            tracing::debug!(entries = removed, "cache invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_drops_only_matching_entries() {
        let mut cache = Cache::new();
        cache.insert("User", RecordId(1), "Name", Value::from("John"));
        cache.insert("User", RecordId(2), "Name", Value::from("Jane"));
        cache.insert("User", RecordId(1), "Email", Value::from("jsmith@example.com"));

        cache.invalidate("User", &[RecordId(1)], "Name");

        assert!(!cache.contains("User", RecordId(1), "Name"));
        assert!(cache.contains("User", RecordId(2), "Name"));
        assert!(cache.contains("User", RecordId(1), "Email"));
    }

    #[test]
    fn evict_records_drops_all_fields_of_record() {
        let mut cache = Cache::new();
        cache.insert("User", RecordId(1), "Name", Value::from("John"));
        cache.insert("User", RecordId(1), "Email", Value::Null);
        cache.insert("Tag", RecordId(1), "Name", Value::from("Trending"));

        cache.evict_records("User", &[RecordId(1)]);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("Tag", RecordId(1), "Name"));
    }
}
