use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CoordinatorNodeStore, CronScheduleStore, DeadLetterStore, IntervalScheduleStore, JobStore,
    LogStore, WorkerStore,
};
use crate::cluster::model::{CoordinatorNode, NodeStatus, Worker, WorkerStatus};
use crate::election::CoordinatorRole;
use crate::error::Result;
use crate::scheduler::job::{DeadLetter, Job, JobStatus, LogEntry};
use crate::scheduler::schedule::{CronSchedule, IntervalSchedule};

/// In-process implementation of every store.
///
/// Cloning yields another handle onto the same tables, so coordinators in one
/// process (tests, `local-cluster`) share state exactly as they would through
/// a database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    cron_schedules: Arc<RwLock<HashMap<Uuid, CronSchedule>>>,
    interval_schedules: Arc<RwLock<HashMap<Uuid, IntervalSchedule>>>,
    nodes: Arc<RwLock<HashMap<String, CoordinatorNode>>>,
    workers: Arc<RwLock<HashMap<String, Worker>>>,
    dead_letters: Arc<RwLock<HashMap<Uuid, DeadLetter>>>,
    logs: Arc<RwLock<Vec<LogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cutoff(timeout: Duration) -> DateTime<Utc> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() - timeout
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, mut job: Job) -> Result<Job> {
        job.version = 0;
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn update_if_version(&self, mut job: Job, expected_version: u64) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&job.id).map(|j| j.version);
        if current != Some(expected_version) {
            return Ok(false);
        }
        job.version = expected_version + 1;
        jobs.insert(job.id, job);
        Ok(true)
    }

    async fn remove_if_version(&self, job_id: Uuid, expected_version: u64) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if jobs.get(&job_id).map(|j| j.version) != Some(expected_version) {
            return Ok(false);
        }
        jobs.remove(&job_id);
        Ok(true)
    }

    async fn get_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        let mut pending: Vec<Job> = jobs.values().filter(|j| j.is_ready(now)).cloned().collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn get_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| j.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<usize> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .count())
    }

    async fn get_jobs_by_follower(&self, node_id: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.follower_node_id.as_deref() == Some(node_id))
            .cloned()
            .collect())
    }

    async fn get_jobs_needing_cleanup(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status.is_terminal() && j.follower_node_id.is_some() && !j.channels_cleaned)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CronScheduleStore for MemoryStore {
    async fn add(&self, schedule: CronSchedule) -> Result<()> {
        self.cron_schedules.write().await.insert(schedule.id, schedule);
        Ok(())
    }

    async fn get(&self, schedule_id: Uuid) -> Result<Option<CronSchedule>> {
        Ok(self.cron_schedules.read().await.get(&schedule_id).cloned())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<CronSchedule>> {
        let schedules = self.cron_schedules.read().await;
        let mut due: Vec<CronSchedule> = schedules
            .values()
            .filter(|s| crate::scheduler::evaluator::is_due(*s, now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_time);
        Ok(due)
    }

    async fn update_run_times(
        &self,
        schedule_id: Uuid,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut schedules = self.cron_schedules.write().await;
        match schedules.get_mut(&schedule_id) {
            Some(schedule) => {
                schedule.next_run_time = next_run_time;
                schedule.last_run_time = Some(last_run_time);
                Ok(())
            }
            None => Err(crate::error::CoordinatorError::Store(format!(
                "cron schedule {} not found",
                schedule_id
            ))),
        }
    }
}

#[async_trait]
impl IntervalScheduleStore for MemoryStore {
    async fn add(&self, schedule: IntervalSchedule) -> Result<()> {
        self.interval_schedules
            .write()
            .await
            .insert(schedule.id, schedule);
        Ok(())
    }

    async fn get(&self, schedule_id: Uuid) -> Result<Option<IntervalSchedule>> {
        Ok(self.interval_schedules.read().await.get(&schedule_id).cloned())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<IntervalSchedule>> {
        let schedules = self.interval_schedules.read().await;
        let mut due: Vec<IntervalSchedule> = schedules
            .values()
            .filter(|s| crate::scheduler::evaluator::is_due(*s, now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_time);
        Ok(due)
    }

    async fn update_run_times(
        &self,
        schedule_id: Uuid,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut schedules = self.interval_schedules.write().await;
        match schedules.get_mut(&schedule_id) {
            Some(schedule) => {
                schedule.next_run_time = next_run_time;
                schedule.last_run_time = Some(last_run_time);
                Ok(())
            }
            None => Err(crate::error::CoordinatorError::Store(format!(
                "interval schedule {} not found",
                schedule_id
            ))),
        }
    }
}

#[async_trait]
impl CoordinatorNodeStore for MemoryStore {
    async fn upsert(&self, mut node: CoordinatorNode) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if let Some(existing) = nodes.get(&node.node_id) {
            node.joined_at = existing.joined_at;
        }
        nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    async fn get(&self, node_id: &str) -> Result<Option<CoordinatorNode>> {
        Ok(self.nodes.read().await.get(node_id).cloned())
    }

    async fn list(&self) -> Result<Vec<CoordinatorNode>> {
        let mut nodes: Vec<CoordinatorNode> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    async fn update_role(&self, node_id: &str, role: CoordinatorRole) -> Result<()> {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.role = role;
        }
        Ok(())
    }

    async fn mark_offline(
        &self,
        node_id: &str,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node_id) {
            Some(node) if observed_heartbeat.map_or(true, |seen| seen == node.last_heartbeat) => {
                if node.status == NodeStatus::Offline {
                    return Ok(false);
                }
                node.status = NodeStatus::Offline;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_dead_nodes(&self, timeout: Duration) -> Result<Vec<CoordinatorNode>> {
        let threshold = cutoff(timeout);
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.status != NodeStatus::Offline && n.last_heartbeat < threshold)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn upsert(&self, mut worker: Worker) -> Result<()> {
        let mut workers = self.workers.write().await;
        if let Some(existing) = workers.get(&worker.worker_id) {
            worker.registered_at = existing.registered_at;
        }
        workers.insert(worker.worker_id.clone(), worker);
        Ok(())
    }

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>> {
        Ok(self.workers.read().await.get(worker_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    async fn record_heartbeat(
        &self,
        worker_id: &str,
        current_load: u32,
        status: WorkerStatus,
    ) -> Result<bool> {
        match self.workers.write().await.get_mut(worker_id) {
            Some(worker) => {
                worker.current_load = current_load;
                worker.status = status;
                worker.last_heartbeat = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_offline(
        &self,
        worker_id: &str,
        observed_heartbeat: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker_id) {
            Some(worker)
                if observed_heartbeat.map_or(true, |seen| seen == worker.last_heartbeat) =>
            {
                if worker.status == WorkerStatus::Offline {
                    return Ok(false);
                }
                worker.status = WorkerStatus::Offline;
                worker.current_load = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_dead_workers(&self, timeout: Duration) -> Result<Vec<Worker>> {
        let threshold = cutoff(timeout);
        Ok(self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.status != WorkerStatus::Offline && w.last_heartbeat < threshold)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn archive(&self, letter: DeadLetter) -> Result<bool> {
        let mut letters = self.dead_letters.write().await;
        if letters.contains_key(&letter.original_job_id) {
            return Ok(false);
        }
        letters.insert(letter.original_job_id, letter);
        Ok(true)
    }

    async fn get_by_job(&self, original_job_id: Uuid) -> Result<Option<DeadLetter>> {
        Ok(self.dead_letters.read().await.get(&original_job_id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut letters: Vec<DeadLetter> =
            self.dead_letters.read().await.values().cloned().collect();
        letters.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        letters.truncate(limit);
        Ok(letters)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append(&self, entry: LogEntry) -> Result<()> {
        self.logs.write().await.push(entry);
        Ok(())
    }

    async fn get_for_job(&self, job_id: Uuid) -> Result<Vec<LogEntry>> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }
}
