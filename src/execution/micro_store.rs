use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

use crate::execution::feeds::SnapshotSource;
use crate::models::MicroSnapshot;

/// Single last-write-wins slot for the order book/trade snapshot
#[derive(Clone)]
pub struct MicroStore {
    slot: Arc<RwLock<Option<MicroSnapshot>>>,
    max_age: Duration,
}

impl Default for MicroStore {
    fn default() -> Self {
        Self::new(Duration::seconds(10))
    }
}

impl MicroStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            max_age,
        }
    }

    pub fn publish(&self, snapshot: MicroSnapshot) {
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(snapshot),
            Err(e) => tracing::error!(error = %e, "micro store poisoned, snapshot dropped"),
        }
    }

    pub fn latest(&self) -> Option<MicroSnapshot> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }

    /// Latest snapshot only while it is younger than the freshness threshold
    pub fn fresh(&self, now: DateTime<Utc>) -> Option<MicroSnapshot> {
        self.latest().filter(|s| s.is_fresh(now, self.max_age))
    }

    pub fn reset(&self) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = None;
        }
    }
}

impl SnapshotSource for MicroStore {
    /// Stale snapshots are still returned; the microstructure gate rejects them
    fn get_snapshot(&self) -> Option<MicroSnapshot> {
        self.latest()
    }
}
