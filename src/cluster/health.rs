use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::model::NodeStatus;
use crate::election::LeadershipFlag;
use crate::error::Result;
use crate::ownership::JobReclaimer;
use crate::store::{CoordinatorNodeStore, WorkerStore};
use crate::tasks::PeriodicTask;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSummary {
    pub nodes_offline: usize,
    pub jobs_released: usize,
    pub workers_offline: usize,
}

/// Leader-only detector for coordinators and workers that stopped
/// heartbeating.
pub struct ClusterHealthMonitor {
    node_id: String,
    nodes: Arc<dyn CoordinatorNodeStore>,
    workers: Arc<dyn WorkerStore>,
    reclaimer: Arc<JobReclaimer>,
    leadership: LeadershipFlag,
    node_timeout: Duration,
    worker_timeout: Duration,
    interval: Duration,
}

impl ClusterHealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        nodes: Arc<dyn CoordinatorNodeStore>,
        workers: Arc<dyn WorkerStore>,
        reclaimer: Arc<JobReclaimer>,
        leadership: LeadershipFlag,
        node_timeout: Duration,
        worker_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            nodes,
            workers,
            reclaimer,
            leadership,
            node_timeout,
            worker_timeout,
            interval,
        }
    }

    /// One health pass over coordinators and workers.
    ///
    /// Stale coordinators are marked Offline first. Then the unfinished jobs
    /// of every Offline coordinator are released, whether it timed out now,
    /// signed off cleanly, or had a release fail on an earlier pass.
    pub async fn check(&self, shutdown: &CancellationToken) -> Result<HealthCheckSummary> {
        let mut summary = HealthCheckSummary::default();

        for node in self.nodes.get_dead_nodes(self.node_timeout).await? {
            if shutdown.is_cancelled() {
                return Ok(summary);
            }
            if node.node_id == self.node_id {
                continue;
            }

            // Conditional on the heartbeat we saw, so a node that came back in
            // the meantime is left alone.
            match self
                .nodes
                .mark_offline(&node.node_id, Some(node.last_heartbeat))
                .await
            {
                Ok(true) => {
                    summary.nodes_offline += 1;
                    tracing::warn!(
                        node_id = %node.node_id,
                        last_heartbeat = %node.last_heartbeat,
                        "Coordinator node marked offline"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(node_id = %node.node_id, error = %e, "Failed to mark node offline")
                }
            }
        }

        for node in self.nodes.list().await? {
            if shutdown.is_cancelled() {
                return Ok(summary);
            }
            if node.status != NodeStatus::Offline || node.node_id == self.node_id {
                continue;
            }
            match self.reclaimer.reclaim(&node.node_id).await {
                Ok(released) => summary.jobs_released += released,
                Err(e) => {
                    tracing::error!(node_id = %node.node_id, error = %e, "Failed to release jobs of offline node")
                }
            }
        }

        for worker in self.workers.get_dead_workers(self.worker_timeout).await? {
            if shutdown.is_cancelled() {
                return Ok(summary);
            }
            match self
                .workers
                .mark_offline(&worker.worker_id, Some(worker.last_heartbeat))
                .await
            {
                Ok(true) => {
                    summary.workers_offline += 1;
                    tracing::warn!(
                        worker_id = %worker.worker_id,
                        last_heartbeat = %worker.last_heartbeat,
                        "Worker marked offline"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(worker_id = %worker.worker_id, error = %e, "Failed to mark worker offline")
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl PeriodicTask for ClusterHealthMonitor {
    fn name(&self) -> &'static str {
        "cluster-health-monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn should_run(&self) -> bool {
        self.leadership.is_leader()
    }

    async fn tick(&self, shutdown: &CancellationToken) -> Result<()> {
        self.check(shutdown).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::model::{CoordinatorNode, NodeStatus, Worker, WorkerStatus};
    use crate::scheduler::job::{Job, JobStatus};
    use crate::error::CoordinatorError;
    use crate::store::{JobStore, MemoryStore};
    use crate::transport::{Channels, MemoryBus};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Job store whose owner lookups fail a set number of times.
    struct FlakyJobs {
        inner: MemoryStore,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for FlakyJobs {
        async fn enqueue(&self, job: Job) -> Result<Job> {
            self.inner.enqueue(job).await
        }

        async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
            JobStore::get(&self.inner, job_id).await
        }

        async fn update_if_version(&self, job: Job, expected_version: u64) -> Result<bool> {
            self.inner.update_if_version(job, expected_version).await
        }

        async fn remove_if_version(&self, job_id: Uuid, expected_version: u64) -> Result<bool> {
            self.inner.remove_if_version(job_id, expected_version).await
        }

        async fn get_pending(&self, limit: usize) -> Result<Vec<Job>> {
            self.inner.get_pending(limit).await
        }

        async fn get_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>> {
            self.inner.get_by_status(status, limit).await
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<usize> {
            self.inner.count_by_status(status).await
        }

        async fn get_jobs_by_follower(&self, node_id: &str) -> Result<Vec<Job>> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(CoordinatorError::Store("connection reset".into()));
            }
            self.inner.get_jobs_by_follower(node_id).await
        }

        async fn get_jobs_needing_cleanup(&self, limit: usize) -> Result<Vec<Job>> {
            self.inner.get_jobs_needing_cleanup(limit).await
        }
    }

    fn monitor(store: &MemoryStore) -> ClusterHealthMonitor {
        monitor_with_jobs(store, Arc::new(store.clone()))
    }

    fn monitor_with_jobs(store: &MemoryStore, jobs: Arc<dyn JobStore>) -> ClusterHealthMonitor {
        let shared = Arc::new(store.clone());
        let reclaimer = Arc::new(JobReclaimer::new(
            jobs,
            Arc::new(MemoryBus::new().connect()),
            Channels::new("t"),
        ));
        ClusterHealthMonitor::new(
            "leader",
            shared.clone(),
            shared,
            reclaimer,
            LeadershipFlag::constant(true),
            Duration::from_secs(30),
            Duration::from_secs(30),
            Duration::from_secs(20),
        )
    }

    fn stale() -> chrono::DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(60)
    }

    async fn owned_job(store: &MemoryStore, owner: &str) -> Job {
        let job = store.enqueue(Job::new("t", "q", "{}")).await.unwrap();
        let execution_id = Uuid::new_v4();
        store
            .mark_dispatched(job.id, execution_id, Utc::now())
            .await
            .unwrap();
        assert!(store.try_claim(job.id, execution_id, owner).await.unwrap());
        job
    }

    async fn offline_node(store: &MemoryStore, node_id: &str, last_heartbeat: DateTime<Utc>) {
        let mut node = CoordinatorNode::new(node_id, last_heartbeat);
        node.status = NodeStatus::Offline;
        CoordinatorNodeStore::upsert(store, node).await.unwrap();
    }

    async fn owner_of(store: &MemoryStore, job: &Job) -> Option<String> {
        JobStore::get(store, job.id)
            .await
            .unwrap()
            .unwrap()
            .follower_node_id
    }

    #[tokio::test]
    async fn test_dead_node_is_marked_offline_and_its_jobs_released() {
        let store = MemoryStore::new();
        CoordinatorNodeStore::upsert(&store, CoordinatorNode::new("node-dead", stale()))
            .await
            .unwrap();
        CoordinatorNodeStore::upsert(&store, CoordinatorNode::new("node-live", Utc::now()))
            .await
            .unwrap();

        let running = owned_job(&store, "node-dead").await;

        let summary = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.nodes_offline, 1);
        assert_eq!(summary.jobs_released, 1);

        let dead = CoordinatorNodeStore::get(&store, "node-dead").await.unwrap().unwrap();
        assert_eq!(dead.status, NodeStatus::Offline);
        let live = CoordinatorNodeStore::get(&store, "node-live").await.unwrap().unwrap();
        assert_eq!(live.status, NodeStatus::Active);

        let job = JobStore::get(&store, running.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dispatched);
        assert!(job.follower_node_id.is_none());

        // Already offline, so a second pass finds nothing.
        let again = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(again, HealthCheckSummary::default());
    }

    #[tokio::test]
    async fn test_jobs_of_signed_off_node_are_released() {
        let store = MemoryStore::new();
        // Signed off cleanly, so its heartbeat never goes stale.
        offline_node(&store, "node-gone", Utc::now()).await;
        let job = owned_job(&store, "node-gone").await;

        let summary = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.nodes_offline, 0);
        assert_eq!(summary.jobs_released, 1);
        assert!(owner_of(&store, &job).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_release_is_retried_on_next_pass() {
        let store = MemoryStore::new();
        CoordinatorNodeStore::upsert(&store, CoordinatorNode::new("node-dead", stale()))
            .await
            .unwrap();
        let job = owned_job(&store, "node-dead").await;
        let monitor = monitor_with_jobs(
            &store,
            Arc::new(FlakyJobs {
                inner: store.clone(),
                failures_left: AtomicUsize::new(1),
            }),
        );

        let first = monitor.check(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.nodes_offline, 1);
        assert_eq!(first.jobs_released, 0);
        assert_eq!(owner_of(&store, &job).await.as_deref(), Some("node-dead"));

        let second = monitor.check(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.nodes_offline, 0);
        assert_eq!(second.jobs_released, 1);
        assert!(owner_of(&store, &job).await.is_none());
    }

    #[tokio::test]
    async fn test_offline_nodes_finished_jobs_are_left_alone() {
        let store = MemoryStore::new();
        offline_node(&store, "node-gone", stale()).await;
        let job = owned_job(&store, "node-gone").await;
        let current = JobStore::get(&store, job.id).await.unwrap().unwrap();
        let mut done = current.clone();
        done.status = JobStatus::Completed;
        assert!(store.update_if_version(done, current.version).await.unwrap());

        let summary = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.jobs_released, 0);
        assert_eq!(owner_of(&store, &job).await.as_deref(), Some("node-gone"));
    }

    #[tokio::test]
    async fn test_monitor_never_marks_itself_offline() {
        let store = MemoryStore::new();
        CoordinatorNodeStore::upsert(&store, CoordinatorNode::new("leader", stale()))
            .await
            .unwrap();

        let summary = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.nodes_offline, 0);
    }

    #[tokio::test]
    async fn test_dead_worker_is_marked_offline() {
        let store = MemoryStore::new();
        WorkerStore::upsert(
            &store,
            Worker {
                worker_id: "w1".into(),
                queues: vec!["default".into()],
                max_concurrency: 4,
                current_load: 0,
                last_heartbeat: stale(),
                status: WorkerStatus::Active,
                registered_at: stale(),
                hostname: None,
            },
        )
        .await
        .unwrap();

        let summary = monitor(&store).check(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.workers_offline, 1);
        let worker = WorkerStore::get(&store, "w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
    }
}
