use rand::Rng;
use std::time::Duration;

/// `base` plus a random extra of up to `max_jitter`, so followers on the same
/// cadence do not all hit the lock store at the same instant.
pub fn jittered(base: Duration, max_jitter: Duration) -> Duration {
    let max_ms = max_jitter.as_millis() as u64;
    if max_ms == 0 {
        return base;
    }
    let mut rng = rand::thread_rng();
    base + Duration::from_millis(rng.gen_range(0..=max_ms))
}

/// Delay before a follower's next acquire attempt.
pub fn follower_retry_delay(renew_interval: Duration) -> Duration {
    jittered(renew_interval, renew_interval / 4)
}
