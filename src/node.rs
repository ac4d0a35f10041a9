use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheInvalidator, CacheKeys, MemoryCache};
use crate::cluster::{ClusterHealthMonitor, JobStatsCache, NodeHeartbeat, WorkerRegistry};
use crate::config::CoordinatorConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::election::{CoordinatorRole, LeaderElection};
use crate::error::Result;
use crate::lock::LockProvider;
use crate::ownership::{
    AssignmentSubscriber, ExecutionChannels, JobEventProcessor, JobReclaimer, OwnershipCleanup,
    OwnershipRegistry, UnclaimedJobScanner,
};
use crate::scheduler::{JobDispatcher, JobPlanner, JobQueueScanner, RetryScanner, ScheduleScanner};
use crate::store::Stores;
use crate::tasks::{run_periodic, supervise, PeriodicTask, TaskHealth, TaskState};
use crate::transport::{Channels, Transport};

/// One coordinator process: election, scheduling, ownership and health.
///
/// Every node runs the same set of tasks. Leader-only tasks check the
/// leadership flag at the top of each tick and idle otherwise.
pub struct Coordinator {
    config: CoordinatorConfig,
    stores: Stores,
    election: Arc<LeaderElection>,
    registry: Arc<OwnershipRegistry>,
    stats: Arc<JobStatsCache>,
    cache: Arc<MemoryCache>,
    health: Arc<TaskHealth>,
    reclaimer: Arc<JobReclaimer>,
    heartbeat: Arc<NodeHeartbeat>,
    periodic: Vec<Arc<dyn PeriodicTask>>,
    assignments: Arc<AssignmentSubscriber>,
    workers: Arc<WorkerRegistry>,
}

impl Coordinator {
    /// Build every component of a node on top of the given backends.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(
        config: CoordinatorConfig,
        stores: Stores,
        lock_provider: Arc<dyn LockProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let node_id = config.node_id.clone();
        let channels = Channels::new(config.channel_prefix.clone());
        let election = Arc::new(LeaderElection::from_config(&config, lock_provider));
        let leadership = election.leadership();
        let registry = Arc::new(OwnershipRegistry::new());
        let stats = Arc::new(JobStatsCache::new());
        let cache = Arc::new(MemoryCache::new(CacheKeys::new(config.cache_prefix.clone())));
        let invalidator: Arc<dyn CacheInvalidator> = cache.clone();

        let planner = Arc::new(JobPlanner::new(
            stores.jobs.clone(),
            stores.cron_schedules.clone(),
            stores.interval_schedules.clone(),
        ));
        let dispatcher = Arc::new(JobDispatcher::new(
            stores.jobs.clone(),
            transport.clone(),
            channels.clone(),
            invalidator.clone(),
            stats.clone(),
        ));
        let reclaimer = Arc::new(JobReclaimer::new(
            stores.jobs.clone(),
            transport.clone(),
            channels.clone(),
        ));

        let execution_channels = Arc::new(ExecutionChannels::new(transport.clone(), channels.clone()));
        let cleanup = Arc::new(OwnershipCleanup::new(
            node_id.clone(),
            stores.jobs.clone(),
            registry.clone(),
            execution_channels.clone(),
            stats.clone(),
            config.job_queue_batch_size,
            config.dead_node_check_interval(),
        ));
        let processor = Arc::new(JobEventProcessor::new(
            stores.jobs.clone(),
            stores.logs.clone(),
            invalidator.clone(),
            cleanup.clone(),
        ));
        let assignments = Arc::new(AssignmentSubscriber::new(
            node_id.clone(),
            stores.jobs.clone(),
            transport.clone(),
            channels.clone(),
            registry.clone(),
            execution_channels,
            processor,
            invalidator,
            stats.clone(),
        ));
        let workers = Arc::new(WorkerRegistry::new(
            node_id.clone(),
            stores.workers.clone(),
            transport.clone(),
            channels.clone(),
            config.worker_defaults.clone(),
        ));

        let heartbeat = Arc::new(NodeHeartbeat::new(
            node_id.clone(),
            stores.nodes.clone(),
            transport,
            channels,
            leadership.clone(),
            stats.clone(),
            config.heartbeat_interval(),
        ));

        let periodic: Vec<Arc<dyn PeriodicTask>> = vec![
            heartbeat.clone(),
            Arc::new(ScheduleScanner::new(
                stores.cron_schedules.clone(),
                stores.interval_schedules.clone(),
                planner,
                leadership.clone(),
                config.schedule_scan_interval(),
            )),
            Arc::new(JobQueueScanner::new(
                stores.jobs.clone(),
                dispatcher,
                stats.clone(),
                leadership.clone(),
                config.job_queue_batch_size,
                config.job_queue_scan_interval(),
            )),
            Arc::new(RetryScanner::new(
                stores.jobs.clone(),
                stores.dead_letters.clone(),
                config.retry_backoff.clone(),
                leadership.clone(),
                config.job_queue_batch_size,
                config.retry_scan_interval(),
            )),
            Arc::new(UnclaimedJobScanner::new(
                stores.jobs.clone(),
                reclaimer.clone(),
                leadership.clone(),
                config.unclaimed_grace(),
                config.job_queue_batch_size,
                config.dead_node_check_interval(),
            )),
            Arc::new(ClusterHealthMonitor::new(
                node_id,
                stores.nodes.clone(),
                stores.workers.clone(),
                reclaimer.clone(),
                leadership,
                config.node_timeout(),
                config.worker_defaults.dead_timeout(),
                config.dead_node_check_interval(),
            )),
            cleanup,
        ];

        Ok(Self {
            config,
            stores,
            election,
            registry,
            stats,
            cache,
            health: Arc::new(TaskHealth::new()),
            reclaimer,
            heartbeat,
            periodic,
            assignments,
            workers,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn election(&self) -> &Arc<LeaderElection> {
        &self.election
    }

    pub fn registry(&self) -> &Arc<OwnershipRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<JobStatsCache> {
        &self.stats
    }

    pub fn health(&self) -> &Arc<TaskHealth> {
        &self.health
    }

    pub fn dashboard_state(&self) -> DashboardState {
        DashboardState {
            node_id: self.config.node_id.clone(),
            election: self.election.clone(),
            nodes: self.stores.nodes.clone(),
            jobs: self.stores.jobs.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            health: self.health.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Run the node until `shutdown` fires.
    ///
    /// This is the main entry point that starts all node subsystems:
    /// 1. Releases jobs a previous run of this node still owns and marks the
    ///    node Active before it can claim anything new
    /// 2. Spawns the leader election loop
    /// 3. Spawns the periodic tasks (heartbeat, scanners, health monitor, sweep)
    /// 4. Spawns the assignment and worker-lifecycle consumers
    /// 5. Mirrors leadership changes into this node's store record
    /// 6. Optionally spawns the status API
    ///
    /// On shutdown the election releases its lease and the heartbeat writes an
    /// Offline record. Once every consumer has stopped, the jobs this node
    /// still owns are handed back to the claim race.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let node_id = self.config.node_id.clone();
        match self.reclaimer.reclaim(&node_id).await {
            Ok(0) => {}
            Ok(released) => tracing::info!(node_id = %node_id, released, "Released jobs from previous run"),
            Err(e) => tracing::warn!(node_id = %node_id, error = %e, "Failed to release jobs from previous run"),
        }
        // An Offline record would let the health monitor release new claims.
        if let Err(e) = self.heartbeat.beat().await {
            tracing::warn!(node_id = %node_id, error = %e, "Failed to write initial heartbeat");
        }

        let mut tasks = JoinSet::new();

        {
            let election = self.election.clone();
            let health = self.health.clone();
            let token = shutdown.child_token();
            tasks.spawn(async move {
                health.set("leader-election", TaskState::Running);
                election.run(token).await;
                health.set("leader-election", TaskState::Stopped);
            });
        }

        for task in &self.periodic {
            tasks.spawn(run_periodic(
                task.clone(),
                self.health.clone(),
                shutdown.child_token(),
            ));
        }

        tasks.spawn(supervise(
            "assignment-subscriber",
            self.health.clone(),
            self.assignments.clone().run(shutdown.child_token()),
        ));
        tasks.spawn(supervise(
            "worker-registry",
            self.health.clone(),
            self.workers.clone().run(shutdown.child_token()),
        ));

        {
            let this = self.clone();
            let token = shutdown.child_token();
            tasks.spawn(async move { this.mirror_role(token).await });
        }

        if let Some(addr) = self.config.dashboard_addr {
            tasks.spawn(supervise(
                "status-api",
                self.health.clone(),
                run_dashboard(addr, self.dashboard_state(), shutdown.child_token()),
            ));
        }

        tracing::info!(node_id = %node_id, "Coordinator started");
        shutdown.cancelled().await;
        tracing::info!(node_id = %node_id, "Coordinator shutting down");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(node_id = %node_id, error = %e, "Background task panicked");
            }
        }

        self.hand_over_owned_jobs().await;
        tracing::info!(node_id = %node_id, "Coordinator stopped");
    }

    /// Release every unfinished job of this node and forget its claims.
    /// Anything left behind on failure is released by the leader's health
    /// monitor, since this node's record is Offline by now.
    async fn hand_over_owned_jobs(&self) {
        let node_id = &self.config.node_id;
        match self.reclaimer.reclaim(node_id).await {
            Ok(0) => {}
            Ok(released) => tracing::info!(node_id = %node_id, released, "Handed over owned jobs"),
            Err(e) => tracing::warn!(node_id = %node_id, error = %e, "Failed to hand over owned jobs"),
        }
        for info in self.registry.snapshot() {
            self.registry.release(info.job_id);
        }
        self.stats.set_owned(self.registry.len() as u64);
    }

    /// Write every leadership change to this node's record as soon as it
    /// happens, rather than waiting for the next heartbeat.
    async fn mirror_role(&self, shutdown: CancellationToken) {
        let mut changes = self.election.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let is_leader = *changes.borrow_and_update();
            let role = if is_leader {
                CoordinatorRole::Leader
            } else {
                CoordinatorRole::Follower
            };
            if let Err(e) = self.stores.nodes.update_role(&self.config.node_id, role).await {
                tracing::warn!(node_id = %self.config.node_id, error = %e, "Failed to record role change");
            }
        }
    }
}
