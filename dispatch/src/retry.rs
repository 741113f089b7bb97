//! Retry strategies and the retry executor.
//!
//! A [`RetryStrategy`] answers two questions: should this error be retried at
//! this attempt, and how long to wait first. [`RetryPolicy`] drives an async
//! operation with a strategy and reports how many attempts it took.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dispatch::retry::{ExponentialBackoff, RetryPolicy};
//!
//! let policy = RetryPolicy::new(Arc::new(ExponentialBackoff::default()), 2, Duration::from_millis(100));
//! let outcome = policy.run(|attempt| call_agent(attempt)).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// Backoff policy shared by all retry variants.
pub trait RetryStrategy: Send + Sync + std::fmt::Debug {
    /// True iff the error is retryable and `attempt < max_retries`.
    fn should_retry(&self, error: &DispatchError, attempt: u32, max_retries: u32) -> bool {
        error.is_retryable() && attempt < max_retries
    }

    /// Delay before retry number `attempt` (0-indexed).
    fn get_delay(&self, attempt: u32, base_delay: Duration) -> Duration;
}

/// `base × multiplier^attempt`, capped at `max_delay`, optionally ±20% jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(multiplier: f64, max_delay: Duration) -> Self {
        Self {
            multiplier,
            max_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoff {
    /// 2× multiplier, 30s cap, jitter on.
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn get_delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let raw = base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::thread_rng().gen_range(0.8..=1.2)
        } else {
            capped
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// `base × (attempt + 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackoff;

impl RetryStrategy for LinearBackoff {
    fn get_delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

/// Always `base`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay;

impl RetryStrategy for FixedDelay {
    fn get_delay(&self, _attempt: u32, base_delay: Duration) -> Duration {
        base_delay
    }
}

/// Which strategy a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    #[default]
    Exponential,
    Linear,
    Fixed,
}

impl std::fmt::Display for RetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

impl std::str::FromStr for RetryKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            "fixed" => Ok(Self::Fixed),
            other => Err(DispatchError::configuration(format!(
                "unknown retry strategy '{other}'"
            ))),
        }
    }
}

/// Result of [`RetryPolicy::run`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: DispatchResult<T>,
    /// Number of times the operation was invoked (≥ 1).
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Retries beyond the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Runs an operation under a strategy, up to `max_retries` extra attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    strategy: Arc<dyn RetryStrategy>,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(strategy: Arc<dyn RetryStrategy>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, no retries. Used for the fallback agent.
    pub fn none() -> Self {
        Self::new(Arc::new(FixedDelay), 0, Duration::ZERO)
    }

    pub fn strategy(&self) -> &dyn RetryStrategy {
        self.strategy.as_ref()
    }

    /// Invoke `op(attempt)` until it succeeds, fails terminally, or retries
    /// are exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(err) if self.strategy.should_retry(&err, attempt, self.max_retries) => {
                    let delay = self.strategy.get_delay(attempt, self.base_delay);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt + 1,
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 2 retries, 100ms base, exponential with jitter.
    fn default() -> Self {
        Self::new(
            Arc::new(ExponentialBackoff::default()),
            2,
            Duration::from_millis(100),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_exponential_without_jitter() {
        let s = ExponentialBackoff::new(2.0, Duration::from_millis(350));
        assert_eq!(s.get_delay(0, BASE), Duration::from_millis(100));
        assert_eq!(s.get_delay(1, BASE), Duration::from_millis(200));
        assert_eq!(s.get_delay(2, BASE), Duration::from_millis(350));
        assert_eq!(s.get_delay(40, BASE), Duration::from_millis(350));
    }

    #[test]
    fn test_exponential_uncapped_progression() {
        let s = ExponentialBackoff::new(2.0, Duration::from_secs(60));
        assert_eq!(s.get_delay(2, BASE), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_jitter_within_bounds() {
        let s = ExponentialBackoff::new(2.0, Duration::from_secs(60)).with_jitter(true);
        for _ in 0..100 {
            let d = s.get_delay(1, BASE).as_secs_f64();
            assert!((0.16 - 1e-9..=0.24 + 1e-9).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_linear_and_fixed() {
        assert_eq!(LinearBackoff.get_delay(0, BASE), Duration::from_millis(100));
        assert_eq!(LinearBackoff.get_delay(2, BASE), Duration::from_millis(300));
        assert_eq!(FixedDelay.get_delay(7, BASE), BASE);
    }

    #[test]
    fn test_should_retry_respects_kind_and_budget() {
        let s = FixedDelay;
        let transient = DispatchError::network("reset");
        let terminal = DispatchError::validation("empty");
        assert!(s.should_retry(&transient, 0, 2));
        assert!(s.should_retry(&transient, 1, 2));
        assert!(!s.should_retry(&transient, 2, 2));
        assert!(!s.should_retry(&terminal, 0, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Arc::new(FixedDelay), 3, BASE);
        let outcome = policy
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DispatchError::timeout(Duration::from_secs(1)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(*outcome.result.as_ref().unwrap(), 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_stops_on_terminal_error() {
        let policy = RetryPolicy::new(Arc::new(FixedDelay), 5, BASE);
        let outcome: RetryOutcome<()> = policy
            .run(|_| async { Err(DispatchError::permission("denied")) })
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_exhausts_budget() {
        let policy = RetryPolicy::new(Arc::new(LinearBackoff), 2, BASE);
        let start = tokio::time::Instant::now();
        let outcome: RetryOutcome<()> = policy
            .run(|_| async { Err(DispatchError::network("down")) })
            .await;
        assert_eq!(outcome.attempts, 3);
        // 100ms + 200ms of backoff.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_none_is_single_attempt() {
        let outcome: RetryOutcome<()> = RetryPolicy::none()
            .run(|_| async { Err(DispatchError::network("down")) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }
}
