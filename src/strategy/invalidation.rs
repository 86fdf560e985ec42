use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Cooldown list of extremum bars that recently failed confirmation
///
/// Entries expire after `ttl`; expired entries are pruned lazily.
#[derive(Debug, Clone)]
pub struct InvalidationCache {
    entries: HashMap<usize, DateTime<Utc>>,
    ttl: Duration,
}

impl Default for InvalidationCache {
    fn default() -> Self {
        Self::new(Duration::minutes(15))
    }
}

impl InvalidationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn insert(&mut self, bar_index: usize, at: DateTime<Utc>) {
        self.entries.insert(bar_index, at);
    }

    /// True while the bar is still cooling down
    pub fn contains(&self, bar_index: usize, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&bar_index)
            .is_some_and(|at| now - *at < self.ttl)
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, at| now - *at < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
