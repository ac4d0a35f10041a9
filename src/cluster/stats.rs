use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters a node reports in its heartbeat and metrics.
#[derive(Debug, Default)]
pub struct JobStatsCache {
    owned: AtomicU64,
    queued: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Jobs this node currently follows
    pub owned: u64,
    /// Pending jobs seen by the last queue scan on this node
    pub queued: u64,
    /// Dispatches this node performed while leader
    pub dispatched: u64,
}

impl JobStatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror the size of the ownership registry after a claim or release.
    pub fn set_owned(&self, owned: u64) {
        self.owned.store(owned, Ordering::Relaxed);
    }

    pub fn set_queued(&self, queued: u64) {
        self.queued.store(queued, Ordering::Relaxed);
    }

    pub fn job_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn owned(&self) -> u64 {
        self.owned.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> JobStats {
        JobStats {
            owned: self.owned.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}
