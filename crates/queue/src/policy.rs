use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff applied between attempts of a failing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempts_made - 1)`: base, 2x base, 4x base, ...
    Exponential { base_ms: u64 },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential {
            base_ms: base.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before the next attempt, after `attempts_made` failed attempts.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(20);
                Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// How a job is scheduled: initial delay, attempt budget and retry backoff.
///
/// Passed at submission time so each job carries its own policy, independent
/// of the backend that stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    /// Time from submission until the job becomes visible to workers.
    pub delay_ms: u64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl SchedulingPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(10);

    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            delay_ms: 0,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Same policy, but the job is held back for `delay` after submission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn retry_delay(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            None
        } else {
            Some(self.backoff.delay_for(attempts_made))
        }
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_ATTEMPTS,
            Backoff::exponential(Self::DEFAULT_BACKOFF_BASE),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::exponential(Duration::from_secs(10));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(20));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(40));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(80));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(7), Duration::from_millis(250));
    }

    #[test]
    fn test_default_policy_budget() {
        let policy = SchedulingPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay(), Duration::ZERO);
        assert!(policy.retry_delay(4).is_some());
        assert_eq!(policy.retry_delay(5), None);
    }

    #[test]
    fn test_with_delay() {
        let policy = SchedulingPolicy::default().with_delay(Duration::from_secs(7200));
        assert_eq!(policy.delay(), Duration::from_secs(7200));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_huge_attempt_count_does_not_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(10));
        assert!(backoff.delay_for(u32::MAX) >= Duration::from_secs(10));
    }
}
