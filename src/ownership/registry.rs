use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// A job this node won the claim race for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOwnershipInfo {
    pub job_id: Uuid,
    pub node_id: String,
    pub execution_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

/// Per-node map of owned jobs.
///
/// Best effort and never persisted: the job store's owner column is the
/// source of truth. Claim and release are atomic per job.
#[derive(Debug, Default)]
pub struct OwnershipRegistry {
    owned: DashMap<Uuid, JobOwnershipInfo>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record ownership of an execution.
    ///
    /// Returns false if the same execution is already recorded. A record left
    /// over from an earlier execution of the same job is replaced.
    pub fn claim(&self, info: JobOwnershipInfo) -> bool {
        match self.owned.entry(info.job_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().execution_id == info.execution_id {
                    return false;
                }
                entry.insert(info);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(info);
                true
            }
        }
    }

    pub fn release(&self, job_id: Uuid) -> Option<JobOwnershipInfo> {
        self.owned.remove(&job_id).map(|(_, info)| info)
    }

    /// Release only if the record still belongs to `execution_id`.
    pub fn release_execution(&self, job_id: Uuid, execution_id: Uuid) -> Option<JobOwnershipInfo> {
        self.owned
            .remove_if(&job_id, |_, info| info.execution_id == execution_id)
            .map(|(_, info)| info)
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobOwnershipInfo> {
        self.owned.get(&job_id).map(|info| info.clone())
    }

    pub fn owns(&self, job_id: Uuid) -> bool {
        self.owned.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn snapshot(&self) -> Vec<JobOwnershipInfo> {
        let mut owned: Vec<JobOwnershipInfo> =
            self.owned.iter().map(|entry| entry.value().clone()).collect();
        owned.sort_by_key(|info| info.claimed_at);
        owned
    }
}
