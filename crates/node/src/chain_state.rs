use std::sync::Mutex;

use dagd_consensus::Hash256;

use crate::chain::BestSnapshot;

/// Tip summary readable without going through the block manager mailbox.
#[derive(Debug, Default)]
pub struct ChainStateCache {
    inner: Mutex<BestSnapshot>,
}

impl ChainStateCache {
    pub fn new(snapshot: BestSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    pub fn update(&self, snapshot: BestSnapshot) {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
    }

    pub fn snapshot(&self) -> BestSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn best_hash(&self) -> Hash256 {
        self.snapshot().hash
    }

    pub fn best_height(&self) -> u64 {
        self.snapshot().height
    }

    pub fn median_time(&self) -> i64 {
        self.snapshot().median_time
    }
}
