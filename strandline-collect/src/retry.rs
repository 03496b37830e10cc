//! Retry policy for leaf queries: bounded attempts with capped
//! exponential backoff.
//!
//! Only timeouts and rate limits are retryable; everything else fails the
//! leaf immediately. Exhausted retries are not an error at this layer:
//! the scheduler treats the terminal failure as a signal to split further
//! or give up at the area floor.

use std::time::Duration;

use crate::client::FailureKind;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given delay, then try again.
    Retry(Duration),
    /// Stop; the leaf resolves as a terminal failure.
    GiveUp,
}

/// Retry limits and backoff schedule for a single leaf query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per leaf, the first attempt included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub backoff_min: Duration,
    /// Ceiling for the doubling schedule.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_secs(4),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Decide whether attempt number `attempt` (1-based) may be retried
    /// after failing with `kind`.
    #[must_use]
    pub fn decide(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    /// Backoff before the retry that follows attempt `attempt`: the
    /// minimum delay doubled per attempt, capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let uncapped = self.backoff_min.saturating_mul(1_u32 << exponent);
        uncapped.min(self.backoff_max)
    }
}

/// Bookkeeping for one leaf query; discarded once the leaf resolves.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
    waited: Duration,
}

impl RetryState {
    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a backoff wait.
    pub fn record_wait(&mut self, delay: Duration) {
        self.waited += delay;
    }

    /// Cumulative backoff waited so far.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn three_rate_limits_allow_exactly_two_retries() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        let mut retries = 0;
        loop {
            let attempt = state.begin_attempt();
            match policy.decide(FailureKind::RateLimited, attempt) {
                RetryDecision::Retry(delay) => {
                    retries += 1;
                    state.record_wait(delay);
                }
                RetryDecision::GiveUp => break,
            }
        }
        assert_eq!(retries, 2);
        assert_eq!(state.attempts(), 3);
        // 4s after the first failure, 8s after the second.
        assert_eq!(state.waited(), Duration::from_secs(12));
    }

    #[rstest]
    fn delays_double_then_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = (1..=5).map(|attempt| policy.delay_for(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
        // Strictly increasing until the cap is reached.
        assert!(delays[0] < delays[1]);
        assert!(delays[1] < delays[2]);
        assert_eq!(delays[2], policy.backoff_max);
    }

    #[rstest]
    fn other_failures_are_never_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(FailureKind::Other, 1), RetryDecision::GiveUp);
    }

    #[rstest]
    #[case(FailureKind::Timeout)]
    #[case(FailureKind::RateLimited)]
    fn retryable_failures_get_backoff(#[case] kind: FailureKind) {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(kind, 1),
            RetryDecision::Retry(Duration::from_secs(4))
        );
        assert_eq!(
            policy.decide(kind, 2),
            RetryDecision::Retry(Duration::from_secs(8))
        );
        assert_eq!(policy.decide(kind, 3), RetryDecision::GiveUp);
    }
}
