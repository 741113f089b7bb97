//! Per-agent circuit breaker.
//!
//! Each agent key gets its own [`CircuitBreaker`]. After `failure_threshold`
//! consecutive failures the circuit *opens* and the agent is skipped until
//! the reset window has elapsed since the last failure. The next caller then
//! moves it to *half-open*; two consecutive successes close it again, any
//! failure reopens it immediately.
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(reset elapsed)--> HalfOpen
//!   ^                                   ^                          |
//!   |                                   +-------(failure)----------+
//!   +-------------------(2 consecutive successes)------------------+
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Successes required in half-open before the circuit closes.
pub const HALF_OPEN_SUCCESSES_TO_CLOSE: u32 = 2;

/// Circuit breaker state for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, calls allowed.
    Closed,
    /// Tripped, calls blocked until the reset window expires.
    Open,
    /// Probing recovery, calls allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

/// Failure-isolation state machine for one agent.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before Open → HalfOpen.
    pub reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure: None,
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Whether a call may proceed. An open circuit whose reset window has
    /// elapsed moves to half-open and admits the call.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                }
                elapsed
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= HALF_OPEN_SUCCESSES_TO_CLOSE {
                self.state = CircuitState::Closed;
                self.half_open_successes = 0;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.half_open_successes = 0;
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Current state without triggering the Open → HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            half_open_successes: self.half_open_successes,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// One breaker per agent key, created lazily on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    reset_timeout: Duration,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn with_breaker<T>(&self, key: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.reset_timeout));
        f(breaker)
    }

    pub fn can_execute(&self, key: &str) -> bool {
        self.with_breaker(key, |b| {
            let before = b.state();
            let allowed = b.can_execute();
            if before != b.state() {
                info!(agent = key, "Circuit half-open, probing");
            }
            allowed
        })
    }

    pub fn record_success(&self, key: &str) {
        self.with_breaker(key, |b| {
            let before = b.state();
            b.record_success();
            if before != CircuitState::Closed && b.state() == CircuitState::Closed {
                info!(agent = key, "Circuit closed");
            }
        })
    }

    pub fn record_failure(&self, key: &str) {
        self.with_breaker(key, |b| {
            let before = b.state();
            b.record_failure();
            if before != CircuitState::Open && b.state() == CircuitState::Open {
                warn!(
                    agent = key,
                    failures = b.failure_count(),
                    reset_ms = b.reset_timeout.as_millis() as u64,
                    "Circuit opened"
                );
            }
        })
    }

    /// State for `key`; agents never seen are Closed.
    pub fn state(&self, key: &str) -> CircuitState {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .get(key)
            .map(CircuitBreaker::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers.remove(key);
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .iter()
            .map(|(k, b)| (k.clone(), b.snapshot()))
            .collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let mut cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(9999));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_in_closed_resets_counter() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_three_lifecycle() {
        let reset = Duration::from_secs(30);
        let mut cb = CircuitBreaker::new(3, reset);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.can_execute());

        tokio::time::advance(reset - Duration::from_millis(1)).await;
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let reset = Duration::from_secs(5);
        let mut cb = CircuitBreaker::new(1, reset);
        cb.record_failure();
        tokio::time::advance(reset).await;
        assert!(cb.can_execute());
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        // Half-open success count starts over after reopening.
        tokio::time::advance(reset).await;
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_isolates_agents() {
        let registry = CircuitBreakerRegistry::new(1, Duration::from_secs(10));
        registry.record_failure("event-processor");
        assert!(!registry.can_execute("event-processor"));
        assert!(registry.can_execute("qa-specialist"));
        assert_eq!(registry.state("never-seen"), CircuitState::Closed);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["event-processor"].state, CircuitState::Open);
        assert_eq!(snapshot["qa-specialist"].state, CircuitState::Closed);

        registry.reset("event-processor");
        assert!(registry.can_execute("event-processor"));
    }
}
