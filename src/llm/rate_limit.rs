//! Shared request pacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces outbound calls at least `min_interval` apart across every caller
/// holding the same limiter.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the caller may issue its next request.
    ///
    /// The lock is held across the sleep so waiters are released one slot
    /// at a time in arrival order.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        if let Some(slot) = *next
            && slot > now
        {
            tokio::time::sleep_until(slot).await;
        }
        *next = Some(Instant::now() + self.min_interval);
    }
}
