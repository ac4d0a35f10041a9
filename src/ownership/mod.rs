//! Follower side of the cluster: claiming dispatched jobs and following their
//! executions.
//!
//! Every node, the leader included, is a member of the `followers` consumer
//! group on the assignment channel. Each assignment event reaches one member,
//! which races to set itself as the job's owner with a conditional write. The
//! winner records the claim in its [`OwnershipRegistry`] and subscribes to
//! the execution's status and log channels until the job finishes.
//!
//! # Components
//!
//! - [`AssignmentSubscriber`]: group consumer running the claim race
//! - [`ExecutionChannels`]: per-execution status and log subscriptions
//! - [`JobEventProcessor`]: applies status reports and stores log lines
//! - [`OwnershipCleanup`]: teardown after a terminal status, plus a sweep
//! - [`JobReclaimer`]: returns a departed follower's jobs to the race
//! - [`UnclaimedJobScanner`]: re-announces dispatched jobs nobody claimed

pub mod channels;
pub mod claim;
pub mod cleanup;
pub mod processor;
pub mod reclaim;
pub mod registry;

pub use channels::ExecutionChannels;
pub use claim::AssignmentSubscriber;
pub use cleanup::OwnershipCleanup;
pub use processor::JobEventProcessor;
pub use reclaim::{JobReclaimer, UnclaimedJobScanner};
pub use registry::{JobOwnershipInfo, OwnershipRegistry};
