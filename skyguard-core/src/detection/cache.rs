//! Last-seen cache with expiry

use std::collections::BTreeMap;

/// Keyed values that disappear `ttl_ms` after their last update.
///
/// Iteration order is key order, so emitted lists are stable between updates.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    entries: BTreeMap<String, (T, u64)>,
    ttl_ms: u64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl_ms,
        }
    }

    /// Insert or refresh an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: T, now_ms: u64) {
        self.entries.insert(key.into(), (value, now_ms));
    }

    /// Drop expired entries. Returns true if anything was removed.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        let before = self.entries.len();
        let ttl = self.ttl_ms;
        self.entries
            .retain(|_, (_, seen)| now_ms.saturating_sub(*seen) < ttl);
        self.entries.len() != before
    }

    pub fn values(&self) -> Vec<T> {
        self.entries.values().map(|(v, _)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
