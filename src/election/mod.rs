//! Leader election over a TTL lease.
//!
//! Every coordinator runs the same two-state machine: followers try to take
//! the `coordinator:leader` lease, the leader keeps renewing it at roughly a
//! third of its duration. Leadership is advisory; see [`state::ElectionState`]
//! for what it does and does not guarantee.
//!
//! # Components
//!
//! - [`LeaderElection`]: the election loop and the polled leadership flag
//! - [`state`]: role, epoch and transition bookkeeping
//! - [`timer`]: jittered retry delays for followers

pub mod leader;
pub mod state;
pub mod timer;

pub use leader::{LeaderElection, LeadershipFlag, LEADER_RESOURCE};
pub use state::{CoordinatorRole, ElectionState};
