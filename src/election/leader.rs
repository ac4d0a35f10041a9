use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::state::{CoordinatorRole, ElectionState};
use super::timer;
use crate::config::CoordinatorConfig;
use crate::lock::{DistributedLock, LockProvider};

/// Lock resource every coordinator competes for.
pub const LEADER_RESOURCE: &str = "coordinator:leader";

/// Read-only view of a node's leadership, handed to leader-only tasks.
#[derive(Debug, Clone)]
pub struct LeadershipFlag(watch::Receiver<bool>);

impl LeadershipFlag {
    /// A flag that never changes, for tools and tests that run leader-only
    /// components without an election.
    pub fn constant(is_leader: bool) -> Self {
        let (_, rx) = watch::channel(is_leader);
        Self(rx)
    }

    pub fn is_leader(&self) -> bool {
        *self.0.borrow()
    }
}

/// Lease-based leader election over a single lock resource.
///
/// Each node runs [`LeaderElection::run`]. A follower tries to take the lease
/// on every tick; a leader extends it. Lock-provider errors never escape a
/// tick: they count as a failed acquire or extend and the loop tries again.
pub struct LeaderElection {
    node_id: String,
    provider: Arc<dyn LockProvider>,
    lease: Duration,
    renew_interval: Duration,
    state: RwLock<ElectionState>,
    lock: Mutex<Option<Box<dyn DistributedLock>>>,
    leadership_tx: watch::Sender<bool>,
}

impl LeaderElection {
    pub fn new(
        node_id: impl Into<String>,
        provider: Arc<dyn LockProvider>,
        lease: Duration,
        renew_interval: Duration,
    ) -> Self {
        let (leadership_tx, _) = watch::channel(false);
        Self {
            node_id: node_id.into(),
            provider,
            lease,
            renew_interval,
            state: RwLock::new(ElectionState::new()),
            lock: Mutex::new(None),
            leadership_tx,
        }
    }

    pub fn from_config(config: &CoordinatorConfig, provider: Arc<dyn LockProvider>) -> Self {
        Self::new(
            config.node_id.clone(),
            provider,
            config.leader_lease_duration(),
            config.leader_renew_interval(),
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Polled leadership flag. Leader-only tasks check it at the top of each
    /// tick; it is not a fence around their writes.
    pub fn is_leader(&self) -> bool {
        *self.leadership_tx.borrow()
    }

    /// Receiver that observes every leadership change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leadership_tx.subscribe()
    }

    pub fn leadership(&self) -> LeadershipFlag {
        LeadershipFlag(self.leadership_tx.subscribe())
    }

    pub async fn role(&self) -> CoordinatorRole {
        self.state.read().await.role
    }

    pub async fn state(&self) -> ElectionState {
        self.state.read().await.clone()
    }

    /// Run one step of the state machine and return the resulting role.
    pub async fn tick(&self) -> CoordinatorRole {
        let mut slot = self.lock.lock().await;
        let mut state = self.state.write().await;

        if state.is_leader() {
            let renewed = match slot.as_mut() {
                Some(lock) => match lock.extend(self.lease).await {
                    Ok(renewed) => renewed,
                    Err(e) => {
                        tracing::warn!(node_id = %self.node_id, error = %e, "Lease renewal failed");
                        false
                    }
                },
                None => false,
            };

            if renewed {
                state.record_renewal(Utc::now());
                tracing::trace!(node_id = %self.node_id, "Leader lease renewed");
            } else {
                *slot = None;
                state.become_follower();
                self.notify(false);
                tracing::warn!(node_id = %self.node_id, epoch = state.epoch, "Lost leadership");
            }
        } else {
            let mut lock = self.provider.create_lock(LEADER_RESOURCE);
            match lock.try_acquire(self.lease, Duration::ZERO).await {
                Ok(true) => {
                    *slot = Some(lock);
                    state.become_leader(Utc::now());
                    self.notify(true);
                    tracing::info!(node_id = %self.node_id, epoch = state.epoch, "Acquired leadership");
                }
                Ok(false) => {
                    state.record_failed_attempt();
                    tracing::trace!(node_id = %self.node_id, "Leader lease held elsewhere");
                }
                Err(e) => {
                    state.record_failed_attempt();
                    tracing::warn!(node_id = %self.node_id, error = %e, "Leader lease acquire failed");
                }
            }
        }

        state.role
    }

    /// Drive the election until `shutdown` fires, then step down.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            let delay = match self.tick().await {
                CoordinatorRole::Leader => self.renew_interval,
                CoordinatorRole::Follower => timer::follower_retry_delay(self.renew_interval),
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.resign().await;
    }

    /// Release the lease if held, so another node can take over without
    /// waiting for it to expire.
    pub async fn resign(&self) {
        let mut slot = self.lock.lock().await;
        let mut state = self.state.write().await;

        if let Some(mut lock) = slot.take() {
            if lock.is_held() {
                if let Err(e) = lock.release().await {
                    tracing::warn!(node_id = %self.node_id, error = %e, "Failed to release leader lease");
                } else {
                    tracing::info!(node_id = %self.node_id, "Released leader lease");
                }
            }
        }

        state.become_follower();
        self.notify(false);
    }

    fn notify(&self, is_leader: bool) {
        self.leadership_tx.send_if_modified(|current| {
            if *current == is_leader {
                false
            } else {
                *current = is_leader;
                true
            }
        });
    }
}
