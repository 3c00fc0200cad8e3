//! Reconnection backoff policy
//!
//! Retries double from `base_delay` up to `max_delay`, and stop for good
//! after `max_attempts`. The session owns the timer; this type only decides.

use std::time::Duration;

/// Default delay before the first retry
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for any single retry delay
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Retries allowed before the session gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// What to do after a connection loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule retry number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// No attempts left
    Exhausted,
}

/// Payload of the `on_reconnect` callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectNotice {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decide the next step given how many retries were already scheduled
    pub fn next(&self, attempts_so_far: u32) -> ReconnectDecision {
        if attempts_so_far >= self.max_attempts {
            return ReconnectDecision::Exhausted;
        }
        let attempt = attempts_so_far + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(20), Duration::from_millis(30_000));
        // Overflowing shifts still land on the cap
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = ReconnectPolicy::default();
        for n in 1..40 {
            assert!(policy.delay_for(n) <= policy.delay_for(n + 1));
        }
    }

    #[test]
    fn test_next_until_exhausted() {
        let policy = ReconnectPolicy::default();

        assert_eq!(
            policy.next(0),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.next(4),
            ReconnectDecision::Retry {
                attempt: 5,
                delay: Duration::from_secs(16)
            }
        );
        assert_eq!(policy.next(5), ReconnectDecision::Exhausted);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(1000),
            max_attempts: 2,
        };
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.next(2), ReconnectDecision::Exhausted);
    }
}
