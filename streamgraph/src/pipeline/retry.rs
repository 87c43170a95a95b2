//! Retry with configurable backoff and jitter.
//!
//! Used for every transient failure the driver sees: fetches, transient
//! transform errors, commits and checkpoint writes.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy to spread out retries from many partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// How often and how patiently to retry a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Total attempts, the first one included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Retry bookkeeping for one operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries performed so far.
    pub retries: u32,
    previous_delays: HashMap<String, u64>,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the delay before the next retry.
    #[must_use]
    pub fn calculate_delay(&mut self, key: &str, policy: &RetryPolicy) -> Duration {
        let base = policy.base_delay_ms;
        let max = policy.max_delay_ms;

        let delay = match policy.backoff {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(self.retries))
                .min(max),
            BackoffStrategy::Linear => base
                .saturating_mul(u64::from(self.retries) + 1)
                .min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delays.get(key).copied().unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delays.insert(key.to_string(), next);
                next
            }
        };

        Duration::from_millis(jittered)
    }

    /// Returns true once every retry has been used.
    #[must_use]
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.retries >= policy.max_retries
    }

    /// Attempts made so far, counting the one that just failed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No retries left.
    GiveUp,
}

/// Decides whether a failed attempt gets another try.
#[must_use]
pub fn should_retry(state: &mut RetryState, policy: &RetryPolicy, key: &str) -> RetryDecision {
    if state.is_exhausted(policy) {
        return RetryDecision::GiveUp;
    }
    let delay = state.calculate_delay(key, policy);
    state.retries += 1;
    RetryDecision::Retry(delay)
}

/// Why a retried operation did not succeed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The error was not transient; it was not retried.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made, the first one included.
        attempts: u32,
        /// The last error seen.
        last: E,
    },
}

impl<E> RetryError<E> {
    /// Returns the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// retries.
///
/// `is_transient` decides which errors are retried; anything else is returned
/// at once as [`RetryError::Permanent`].
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    key: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new();

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => match should_retry(&mut state, policy, key) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        key,
                        attempt = state.retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(RetryError::Exhausted {
                        attempts: state.attempts(),
                        last: e,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(max_retries)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.backoff, BackoffStrategy::Exponential);
        assert_eq!(policy.jitter, JitterStrategy::Full);
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy =
            toml::from_str("max_retries = 2\nbackoff = \"linear\"\njitter = \"decorrelated\"").unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff, BackoffStrategy::Linear);
        assert_eq!(policy.jitter, JitterStrategy::Decorrelated);
        assert_eq!(policy.base_delay_ms, 100);
    }

    #[test]
    fn test_exponential_delay_no_jitter() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();

        let delays: Vec<Duration> = (0..3)
            .map(|retries| {
                state.retries = retries;
                state.calculate_delay("key", &policy)
            })
            .collect();
        assert_eq!(delays, vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]);
    }

    #[test]
    fn test_linear_and_constant_delay() {
        let mut state = RetryState::new();
        state.retries = 2;

        let linear = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(state.calculate_delay("key", &linear), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(state.calculate_delay("key", &constant), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();
        state.retries = 10;

        assert_eq!(state.calculate_delay("key", &policy), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut state = RetryState::new();
        let full = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        let decorrelated = full.clone().with_jitter(JitterStrategy::Decorrelated);

        for _ in 0..20 {
            assert!(state.calculate_delay("key", &full) <= Duration::from_millis(100));
            let d = state.calculate_delay("key", &decorrelated);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(10_000));
        }
    }

    #[test]
    fn test_should_retry_gives_up_after_max_retries() {
        let policy = fast(2);
        let mut state = RetryState::new();

        assert!(matches!(should_retry(&mut state, &policy, "k"), RetryDecision::Retry(_)));
        assert!(matches!(should_retry(&mut state, &policy, "k"), RetryDecision::Retry(_)));
        assert_eq!(should_retry(&mut state, &policy, "k"), RetryDecision::GiveUp);
        assert_eq!(state.attempts(), 3);
    }

    #[tokio::test]
    async fn test_three_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<u32, RetryError<String>> = with_retry(
            &fast(5),
            "commit",
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 3 { Err(format!("failure {n}")) } else { Ok(n) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(4));
    }

    #[tokio::test]
    async fn test_six_transient_failures_exhaust_five_retries() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), RetryError<String>> = with_retry(
            &fast(5),
            "commit",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still down".to_string())
            },
            |_| true,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted { attempts: 6, last: "still down".to_string() })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), RetryError<&str>> = with_retry(
            &fast(5),
            "commit",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("schema violation")
            },
            |_| false,
        )
        .await;

        assert_eq!(result.unwrap_err().into_inner(), "schema violation");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
