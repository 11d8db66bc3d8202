//! Retry decisions for stream loading.

use std::time::Duration;

/// Why the most recent recovery attempt was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Resolver or transport error.
    Transient,
    /// Watchdog-detected zero-throughput stall.
    Stall,
}

/// Pure retry policy: given how many attempts have already been made, decide
/// whether to retry and how long to wait first.
///
/// The delay is fixed per attempt; jitter, if ever wanted, belongs here.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// `Some(delay)` while attempts remain, `None` once the budget is spent.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        (attempts < self.max_attempts).then_some(self.delay)
    }
}

/// Mutable retry bookkeeping for the active playback session.
///
/// Reset on every channel switch and whenever playback reaches `Playing`.
#[derive(Debug, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub last_failure: Option<FailureClass>,
}

impl RetryState {
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_until_the_ceiling() {
        let policy = RetryPolicy::default();
        for attempts in 0..5 {
            assert_eq!(
                policy.next_delay(attempts),
                Some(Duration::from_secs(3)),
                "attempt {attempts} should still retry"
            );
        }
        assert_eq!(policy.next_delay(5), None);
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn reset_clears_both_fields() {
        let mut state = RetryState {
            attempts: 3,
            last_failure: Some(FailureClass::Stall),
        };
        state.reset();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.last_failure, None);
    }
}
