use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use super::{DistributedLock, LockProvider, ACQUIRE_RETRY_DELAY};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// Lock table shared by every lock the provider (and its clones) hands out.
///
/// Expiry is measured with `tokio::time::Instant`, so tests running on a
/// paused clock can expire leases by advancing time.
#[derive(Clone, Default)]
pub struct MemoryLockProvider {
    leases: Arc<DashMap<String, Lease>>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the unexpired lease on `resource`, if any.
    pub fn holder(&self, resource: &str) -> Option<Uuid> {
        let now = Instant::now();
        self.leases
            .get(resource)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.token)
    }
}

impl LockProvider for MemoryLockProvider {
    fn create_lock(&self, resource: &str) -> Box<dyn DistributedLock> {
        Box::new(MemoryLock {
            leases: self.leases.clone(),
            resource: resource.to_string(),
            token: Uuid::new_v4(),
            held: false,
        })
    }
}

pub struct MemoryLock {
    leases: Arc<DashMap<String, Lease>>,
    resource: String,
    token: Uuid,
    held: bool,
}

impl MemoryLock {
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Atomic conditional set: take the lease if it is free, expired, or ours.
    fn try_set(&self, ttl: Duration) -> bool {
        let now = Instant::now();
        let lease = Lease {
            token: self.token,
            expires_at: now + ttl,
        };
        match self.leases.entry(self.resource.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now || entry.get().token == self.token {
                    entry.insert(lease);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(lease);
                true
            }
        }
    }

    fn remove_own(&self) {
        let token = self.token;
        self.leases
            .remove_if(&self.resource, |_, lease| lease.token == token);
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn is_held(&self) -> bool {
        self.held
    }

    async fn try_acquire(&mut self, ttl: Duration, timeout: Duration) -> Result<bool> {
        if !self.held {
            self.token = Uuid::new_v4();
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.try_set(ttl) {
                self.held = true;
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ACQUIRE_RETRY_DELAY.min(deadline - now)).await;
        }
    }

    async fn extend(&mut self, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let extended = match self.leases.get_mut(&self.resource) {
            Some(mut lease) if lease.token == self.token && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                true
            }
            _ => false,
        };
        self.held = extended;
        Ok(extended)
    }

    async fn release(&mut self) -> Result<()> {
        self.remove_own();
        self.held = false;
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        if self.held {
            self.remove_own();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn second_contender_is_refused() {
        let provider = MemoryLockProvider::new();
        let mut a = provider.create_lock("coordinator:leader");
        let mut b = provider.create_lock("coordinator:leader");

        assert!(a.try_acquire(TTL, Duration::ZERO).await.unwrap());
        assert!(a.is_held());
        assert!(!b.try_acquire(TTL, Duration::ZERO).await.unwrap());
        assert!(!b.is_held());
    }

    #[tokio::test]
    async fn concurrent_acquires_have_one_winner() {
        let provider = MemoryLockProvider::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let mut lock = provider.create_lock("res");
            handles.push(tokio::spawn(async move {
                let won = lock.try_acquire(TTL, Duration::ZERO).await.unwrap();
                // Keep the winner alive so its lease is not released on drop.
                (won, lock)
            }));
        }

        let mut winners = 0;
        let mut locks = Vec::new();
        for handle in handles {
            let (won, lock) = handle.await.unwrap();
            if won {
                winners += 1;
            }
            locks.push(lock);
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn release_lets_next_contender_in() {
        let provider = MemoryLockProvider::new();
        let mut a = provider.create_lock("res");
        let mut b = provider.create_lock("res");
        let mut c = provider.create_lock("res");

        assert!(a.try_acquire(TTL, Duration::ZERO).await.unwrap());
        a.release().await.unwrap();
        assert!(provider.holder("res").is_none());

        assert!(b.try_acquire(TTL, Duration::ZERO).await.unwrap());
        assert!(!c.try_acquire(TTL, Duration::ZERO).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_and_old_holder_cannot_extend() {
        let provider = MemoryLockProvider::new();
        let mut a = provider.create_lock("res");
        let mut b = provider.create_lock("res");

        assert!(a.try_acquire(TTL, Duration::ZERO).await.unwrap());
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(b.try_acquire(TTL, Duration::ZERO).await.unwrap());
        assert!(!a.extend(TTL).await.unwrap());
        assert!(!a.is_held());

        // The stale holder's release must not remove the new lease.
        a.release().await.unwrap();
        assert!(provider.holder("res").is_some());
        assert!(b.extend(TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_up_to_timeout() {
        let provider = MemoryLockProvider::new();
        let mut a = provider.create_lock("res");
        let mut b = provider.create_lock("res");

        assert!(a.try_acquire(Duration::from_millis(500), Duration::ZERO).await.unwrap());
        assert!(!b
            .try_acquire(TTL, Duration::from_millis(200))
            .await
            .unwrap());
        assert!(b.try_acquire(TTL, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn dropping_a_held_lock_releases_it() {
        let provider = MemoryLockProvider::new();
        {
            let mut a = provider.create_lock("res");
            assert!(a.try_acquire(TTL, Duration::ZERO).await.unwrap());
        }
        assert!(provider.holder("res").is_none());
    }
}
