//! TTL-scoped mutual exclusion over named resources.
//!
//! A lock is created per acquisition from a [`LockProvider`]. Each acquisition
//! carries a unique token; extend and release only act on the shared record if
//! it still holds that token, so a holder whose lease expired and was taken by
//! someone else can neither renew nor delete the new holder's lease.
//!
//! # Components
//!
//! - [`memory::MemoryLockProvider`]: in-process table, used by tests and `local-cluster`
//! - [`redis::RedisLockProvider`]: `SET NX PX` plus compare-and-act Lua scripts
//!
//! Dropping a lock that is still held releases it on a best-effort basis.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryLockProvider;
pub use self::redis::RedisLockProvider;

/// Delay between acquire attempts while waiting out a timeout.
pub const ACQUIRE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
pub trait DistributedLock: Send + Sync {
    fn resource(&self) -> &str;

    /// Whether this handle believes it holds the lease. Only a successful
    /// `extend` proves it still does.
    fn is_held(&self) -> bool;

    /// Try to take the lease for `ttl`, retrying until `timeout` elapses.
    /// A zero timeout makes exactly one attempt.
    async fn try_acquire(&mut self, ttl: Duration, timeout: Duration) -> Result<bool>;

    /// Push the expiry of a held lease out to `ttl` from now.
    async fn extend(&mut self, ttl: Duration) -> Result<bool>;

    async fn release(&mut self) -> Result<()>;
}

pub trait LockProvider: Send + Sync {
    fn create_lock(&self, resource: &str) -> Box<dyn DistributedLock>;
}
