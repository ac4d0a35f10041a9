//! Persistent state the coordinators share.
//!
//! The stores are the single source of truth for the cluster. Coordinators
//! never talk to each other directly; they read and conditionally write these
//! records, so every mutation a leader-only task performs must tolerate being
//! executed twice.
//!
//! # Components
//!
//! - [`JobStore`]: job rows with an explicit `version` compared on every write
//! - [`CronScheduleStore`] / [`IntervalScheduleStore`]: recurring definitions
//! - [`CoordinatorNodeStore`] / [`WorkerStore`]: heartbeat records
//! - [`DeadLetterStore`] / [`LogStore`]: append-only archives
//! - [`memory::MemoryStore`]: in-process implementation of all of the above
//!
//! Most job mutations are provided methods built on two primitives,
//! [`JobStore::get`] and [`JobStore::update_if_version`], so a backend only
//! has to supply an atomic compare-and-swap.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cluster::model::{CoordinatorNode, Worker, WorkerStatus};
use crate::election::CoordinatorRole;
use crate::error::Result;
use crate::scheduler::job::{DeadLetter, Job, JobStatus, LogEntry};
use crate::scheduler::schedule::{CronSchedule, IntervalSchedule};

pub use memory::MemoryStore;

/// Attempts made by [`JobStore::update_status`] before giving up on a row that
/// keeps changing underneath it.
const STATUS_UPDATE_ATTEMPTS: usize = 5;

/// A worker-reported status change for one execution of a job.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum StatusOutcome {
    Applied(Job),
    /// The report belongs to an earlier execution of the job
    Stale,
    /// The transition would move the job backwards
    Rejected { current: JobStatus },
    NotFound,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<Job>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Replace the row with `job` if its stored version still equals
    /// `expected_version`. The stored version is bumped on success.
    async fn update_if_version(&self, job: Job, expected_version: u64) -> Result<bool>;

    /// Delete the row if its stored version still equals `expected_version`.
    async fn remove_if_version(&self, job_id: Uuid, expected_version: u64) -> Result<bool>;

    /// Pending jobs whose `scheduled_at` is unset or not in the future, ordered
    /// by priority descending then creation time ascending.
    async fn get_pending(&self, limit: usize) -> Result<Vec<Job>>;

    async fn get_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>>;

    async fn count_by_status(&self, status: JobStatus) -> Result<usize>;

    async fn get_jobs_by_follower(&self, node_id: &str) -> Result<Vec<Job>>;

    /// Terminal jobs with an owner whose channels have not been torn down.
    async fn get_jobs_needing_cleanup(&self, limit: usize) -> Result<Vec<Job>>;

    /// Record a dispatch attempt. Only a Pending job is moved to Dispatched;
    /// the worker id stays unset until a worker reports in.
    async fn mark_dispatched(
        &self,
        job_id: Uuid,
        execution_id: Uuid,
        dispatched_at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }

        let expected = job.version;
        let mut updated = job;
        updated.status = JobStatus::Dispatched;
        updated.execution_id = Some(execution_id);
        updated.dispatched_at = Some(dispatched_at);
        updated.channels_cleaned = false;
        self.update_if_version(updated, expected).await
    }

    /// Put a Dispatched job back to Pending when its assignment could not be
    /// announced. Only the unclaimed `execution_id` attempt is reverted.
    async fn revert_dispatch(&self, job_id: Uuid, execution_id: Uuid) -> Result<bool> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Dispatched
            || job.execution_id != Some(execution_id)
            || job.follower_node_id.is_some()
        {
            return Ok(false);
        }

        let expected = job.version;
        let mut reverted = job;
        reverted.status = JobStatus::Pending;
        reverted.execution_id = None;
        reverted.dispatched_at = None;
        self.update_if_version(reverted, expected).await
    }

    /// Claim ownership of one execution of a job for `node_id`. Fails if
    /// `execution_id` is not the job's current attempt, another follower
    /// already owns it, or the row changed between read and write.
    async fn try_claim(&self, job_id: Uuid, execution_id: Uuid, node_id: &str) -> Result<bool> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        if job.execution_id != Some(execution_id) || job.follower_node_id.is_some() {
            return Ok(false);
        }

        let expected = job.version;
        let mut claimed = job;
        claimed.follower_node_id = Some(node_id.to_string());
        self.update_if_version(claimed, expected).await
    }

    /// Apply a worker status report to the job row.
    async fn update_status(&self, report: &StatusReport) -> Result<StatusOutcome> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let Some(job) = self.get(report.job_id).await? else {
                return Ok(StatusOutcome::NotFound);
            };
            if job.execution_id != Some(report.execution_id) {
                return Ok(StatusOutcome::Stale);
            }
            if !job.status.can_transition_to(report.status) {
                return Ok(StatusOutcome::Rejected { current: job.status });
            }

            let expected = job.version;
            let mut updated = job;
            updated.status = report.status;
            if report.error.is_some() {
                updated.error = report.error.clone();
            }
            if report.worker_id.is_some() {
                updated.worker_id = report.worker_id.clone();
            }
            if report.status == JobStatus::Running && updated.started_at.is_none() {
                updated.started_at = Some(Utc::now());
            }
            if report.status.is_terminal() {
                updated.completed_at = Some(report.completed_at.unwrap_or_else(Utc::now));
            }

            if self.update_if_version(updated.clone(), expected).await? {
                updated.version = expected + 1;
                return Ok(StatusOutcome::Applied(updated));
            }
        }

        Err(crate::error::CoordinatorError::Store(format!(
            "job {} kept changing while applying status {}",
            report.job_id, report.status
        )))
    }

    /// Reset a failed job for another attempt while retries remain.
    ///
    /// The retry count is bumped, worker and start time are cleared, and the
    /// previous attempt's owner and execution are dropped so the next dispatch
    /// starts a fresh claim race.
    async fn try_retry(&self, job_id: Uuid, run_at: Option<DateTime<Utc>>) -> Result<bool> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Failed || job.retries_exhausted() {
            return Ok(false);
        }

        let expected = job.version;
        let mut retried = job;
        retried.retry_count += 1;
        retried.status = JobStatus::Pending;
        retried.worker_id = None;
        retried.started_at = None;
        retried.completed_at = None;
        retried.dispatched_at = None;
        retried.follower_node_id = None;
        retried.execution_id = None;
        retried.channels_cleaned = false;
        retried.scheduled_at = run_at;
        self.update_if_version(retried, expected).await
    }

    async fn mark_channels_cleaned(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        if job.channels_cleaned {
            return Ok(true);
        }

        let expected = job.version;
        let mut updated = job;
        updated.channels_cleaned = true;
        self.update_if_version(updated, expected).await
    }

    /// Dispatched or Running jobs without an owner that were dispatched
    /// before `dispatched_before`, oldest first.
    async fn get_unclaimed(
        &self,
        dispatched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let mut unclaimed = Vec::new();
        for status in [JobStatus::Dispatched, JobStatus::Running] {
            unclaimed.extend(
                self.get_by_status(status, usize::MAX)
                    .await?
                    .into_iter()
                    .filter(|j| j.follower_node_id.is_none())
                    .filter(|j| j.dispatched_at.map_or(true, |at| at < dispatched_before)),
            );
        }
        unclaimed.sort_by_key(|j| j.dispatched_at);
        unclaimed.truncate(limit);
        Ok(unclaimed)
    }

    /// Clear the owner of every non-terminal job held by `node_id`.
    ///
    /// Returns the jobs actually released. A job whose row changed in the
    /// meantime is skipped; the health monitor releases the jobs of offline
    /// nodes on every pass, so it is picked up again.
    async fn release_jobs_from_follower(&self, node_id: &str) -> Result<Vec<Job>> {
        let mut released = Vec::new();
        for job in self.get_jobs_by_follower(node_id).await? {
            if job.status.is_terminal() {
                continue;
            }
            let expected = job.version;
            let mut updated = job;
            updated.follower_node_id = None;
            if self.update_if_version(updated.clone(), expected).await? {
                updated.version = expected + 1;
                released.push(updated);
            }
        }
        Ok(released)
    }
}

#[async_trait]
pub trait CronScheduleStore: Send + Sync {
    async fn add(&self, schedule: CronSchedule) -> Result<()>;

    async fn get(&self, schedule_id: Uuid) -> Result<Option<CronSchedule>>;

    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<CronSchedule>>;

    async fn update_run_times(
        &self,
        schedule_id: Uuid,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait IntervalScheduleStore: Send + Sync {
    async fn add(&self, schedule: IntervalSchedule) -> Result<()>;

    async fn get(&self, schedule_id: Uuid) -> Result<Option<IntervalSchedule>>;

    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<IntervalSchedule>>;

    async fn update_run_times(
        &self,
        schedule_id: Uuid,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait CoordinatorNodeStore: Send + Sync {
    /// Write a heartbeat. `joined_at` of an existing record is preserved.
    async fn upsert(&self, node: CoordinatorNode) -> Result<()>;

    async fn get(&self, node_id: &str) -> Result<Option<CoordinatorNode>>;

    async fn list(&self) -> Result<Vec<CoordinatorNode>>;

    async fn update_role(&self, node_id: &str, role: CoordinatorRole) -> Result<()>;

    /// Mark a node Offline, but only if its last heartbeat is still the one
    /// the caller observed. A node that heartbeated since stays Active.
    async fn mark_offline(&self, node_id: &str, observed_heartbeat: Option<DateTime<Utc>>)
        -> Result<bool>;

    /// Non-offline nodes whose last heartbeat is older than `timeout`.
    async fn get_dead_nodes(&self, timeout: Duration) -> Result<Vec<CoordinatorNode>>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Last write wins, keyed by worker id. `registered_at` is preserved.
    async fn upsert(&self, worker: Worker) -> Result<()>;

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>>;

    async fn list(&self) -> Result<Vec<Worker>>;

    /// Refresh a known worker's heartbeat. Returns false for unknown workers.
    async fn record_heartbeat(
        &self,
        worker_id: &str,
        current_load: u32,
        status: WorkerStatus,
    ) -> Result<bool>;

    async fn mark_offline(&self, worker_id: &str, observed_heartbeat: Option<DateTime<Utc>>)
        -> Result<bool>;

    async fn get_dead_workers(&self, timeout: Duration) -> Result<Vec<Worker>>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Archive a dead letter once per original job. Returns false if one
    /// already exists for that job.
    async fn archive(&self, letter: DeadLetter) -> Result<bool>;

    async fn get_by_job(&self, original_job_id: Uuid) -> Result<Option<DeadLetter>>;

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<()>;

    async fn get_for_job(&self, job_id: Uuid) -> Result<Vec<LogEntry>>;
}

/// Handles to every store a coordinator uses.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub cron_schedules: Arc<dyn CronScheduleStore>,
    pub interval_schedules: Arc<dyn IntervalScheduleStore>,
    pub nodes: Arc<dyn CoordinatorNodeStore>,
    pub workers: Arc<dyn WorkerStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub logs: Arc<dyn LogStore>,
}

impl Stores {
    /// All stores backed by one shared in-process [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_memory(MemoryStore::new())
    }

    pub fn from_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            cron_schedules: store.clone(),
            interval_schedules: store.clone(),
            nodes: store.clone(),
            workers: store.clone(),
            dead_letters: store.clone(),
            logs: store,
        }
    }
}
