use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces operations at least `interval` apart across every caller sharing it.
///
/// Each `acquire` reserves the next free slot and sleeps until it, so a pool
/// of N workers still starts no more than one send per interval.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for this caller's slot. Returns the instant the slot started.
    pub async fn acquire(&self) -> Instant {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
        slot
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(1500));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1500)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }

        let mut slots = Vec::new();
        for handle in handles {
            slots.push(handle.await.unwrap() - start);
        }
        slots.sort();

        assert_eq!(
            slots,
            vec![
                Duration::ZERO,
                Duration::from_millis(1500),
                Duration::from_millis(3000),
                Duration::from_millis(4500),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_accumulate_credit() {
        let limiter = RateLimiter::new(Duration::from_millis(1500));
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert_eq!(b - a, Duration::from_millis(1500));
    }
}
