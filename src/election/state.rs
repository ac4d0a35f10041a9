use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinator role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorRole {
    Follower,
    Leader,
}

impl std::fmt::Display for CoordinatorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorRole::Follower => write!(f, "follower"),
            CoordinatorRole::Leader => write!(f, "leader"),
        }
    }
}

/// Volatile election state held by every node.
///
/// # Leadership Invariants
///
/// ## Lease Exclusivity
/// At most one node believes it is leader while the lease is valid. Enforced by:
/// - Leadership is entered only after an atomic conditional acquire succeeds
/// - Every tick as leader renews the lease; a failed renewal demotes immediately
///
/// ## No Fencing
/// Leadership is advisory. A node that just lost its lease may still finish a
/// tick it started as leader, so every leader-only write must be a conditional
/// write that is safe to repeat. `epoch` is reported for observability but is
/// not checked by the stores.
#[derive(Debug, Clone)]
pub struct ElectionState {
    pub role: CoordinatorRole,

    /// Number of times this node has acquired leadership
    pub epoch: u64,

    pub leader_since: Option<DateTime<Utc>>,
    pub last_renewed: Option<DateTime<Utc>>,

    /// Consecutive ticks on which an acquire attempt did not succeed
    pub failed_attempts: u64,
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionState {
    pub fn new() -> Self {
        Self {
            role: CoordinatorRole::Follower,
            epoch: 0,
            leader_since: None,
            last_renewed: None,
            failed_attempts: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == CoordinatorRole::Leader
    }

    /// Transition to leader after acquiring the lease.
    pub fn become_leader(&mut self, now: DateTime<Utc>) {
        self.role = CoordinatorRole::Leader;
        self.epoch += 1;
        self.leader_since = Some(now);
        self.last_renewed = Some(now);
        self.failed_attempts = 0;
    }

    pub fn record_renewal(&mut self, now: DateTime<Utc>) {
        self.last_renewed = Some(now);
    }

    pub fn record_failed_attempt(&mut self) {
        self.failed_attempts += 1;
    }

    /// Transition to follower, either after losing the lease or on shutdown.
    pub fn become_follower(&mut self) {
        self.role = CoordinatorRole::Follower;
        self.leader_since = None;
        self.last_renewed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_follower() {
        let state = ElectionState::new();
        assert_eq!(state.role, CoordinatorRole::Follower);
        assert_eq!(state.epoch, 0);
        assert!(!state.is_leader());
        assert!(state.leader_since.is_none());
    }

    #[test]
    fn test_become_leader_increments_epoch() {
        let mut state = ElectionState::new();
        state.record_failed_attempt();
        state.become_leader(Utc::now());
        assert!(state.is_leader());
        assert_eq!(state.epoch, 1);
        assert_eq!(state.failed_attempts, 0);
        assert!(state.leader_since.is_some());

        state.become_follower();
        state.become_leader(Utc::now());
        assert_eq!(state.epoch, 2);
    }

    #[test]
    fn test_become_follower_clears_leadership() {
        let mut state = ElectionState::new();
        state.become_leader(Utc::now());
        state.become_follower();
        assert_eq!(state.role, CoordinatorRole::Follower);
        assert!(state.leader_since.is_none());
        assert!(state.last_renewed.is_none());
        assert_eq!(state.epoch, 1);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(CoordinatorRole::Leader.to_string(), "leader");
        assert_eq!(CoordinatorRole::Follower.to_string(), "follower");
    }
}
