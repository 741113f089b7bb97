//! Dispatch error taxonomy with retry classification.
//!
//! Every failure crossing a component boundary is a [`DispatchError`]. The
//! [`ErrorKind`] decides the default retry behaviour; individual errors may
//! override it (the rate-limit middleware rejects with a non-retryable
//! `RateLimit`, for instance).
//!
//! ## Kinds
//!
//! | Kind          | Retryable by default |
//! |---------------|----------------------|
//! | Timeout       | yes                  |
//! | Network       | yes                  |
//! | RateLimit     | yes                  |
//! | Validation    | no                   |
//! | Configuration | no                   |
//! | Permission    | no                   |
//! | Parsing       | no                   |
//! | Execution     | no                   |
//! | Unknown       | no                   |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error category used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Handler or model call exceeded its deadline.
    Timeout,
    /// Transport-level failure talking to an external service.
    Network,
    /// Upstream or local rate limit hit.
    RateLimit,
    /// Input or context rejected before execution.
    Validation,
    /// Misconfigured engine or missing handler.
    Configuration,
    /// Caller is not allowed to perform the operation.
    Permission,
    /// Untrusted text could not be decoded into the expected shape.
    Parsing,
    /// Handler ran and failed, or was blocked by its circuit breaker.
    Execution,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Whether errors of this kind are retried unless overridden.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::RateLimit)
    }

    /// Every kind, in declaration order.
    pub fn all() -> &'static [ErrorKind] {
        &[
            Self::Timeout,
            Self::Network,
            Self::RateLimit,
            Self::Validation,
            Self::Configuration,
            Self::Permission,
            Self::Parsing,
            Self::Execution,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Permission => write!(f, "permission"),
            Self::Parsing => write!(f, "parsing"),
            Self::Execution => write!(f, "execution"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Unified error type for the dispatch engine.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct DispatchError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    causes: Vec<DispatchError>,
}

/// Result alias used across the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Build an error whose retryability follows the kind's default.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable_by_default(),
            causes: Vec::new(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Error surfaced when a handler's circuit breaker refuses the call.
    pub fn circuit_open(agent_key: &str) -> Self {
        Self::execution(format!("circuit breaker open for agent '{agent_key}'"))
    }

    /// Aggregate the primary and fallback failures into one error.
    ///
    /// The kind is taken from the fallback failure since that is the last
    /// thing that happened; both causes stay reachable through [`causes`].
    ///
    /// [`causes`]: DispatchError::causes
    pub fn exhausted(
        primary_agent: &str,
        primary: DispatchError,
        fallback_agent: &str,
        fallback: DispatchError,
    ) -> Self {
        Self {
            kind: fallback.kind,
            message: format!(
                "primary agent '{primary_agent}' failed ({primary}); \
                 fallback agent '{fallback_agent}' failed ({fallback})"
            ),
            retryable: false,
            causes: vec![primary, fallback],
        }
    }

    /// Override the kind's default retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Root causes for aggregated errors; empty otherwise.
    pub fn causes(&self) -> &[DispatchError] {
        &self.causes
    }
}

impl From<tokio::time::error::Elapsed> for DispatchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, "deadline elapsed")
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::parsing(err.to_string())
    }
}

impl From<toml::de::Error> for DispatchError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(DispatchError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(DispatchError::network("connection reset").is_retryable());
        assert!(DispatchError::rate_limit("429").is_retryable());
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Configuration,
            ErrorKind::Permission,
            ErrorKind::Parsing,
            ErrorKind::Execution,
            ErrorKind::Unknown,
        ] {
            assert!(!DispatchError::new(kind, "x").is_retryable(), "{kind}");
        }
    }

    #[test]
    fn override_retryability() {
        let err = DispatchError::rate_limit("window full").with_retryable(false);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(!err.is_retryable());
    }

    #[test]
    fn circuit_open_names_agent() {
        let err = DispatchError::circuit_open("qa-specialist");
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("qa-specialist"));
    }

    #[test]
    fn exhausted_keeps_both_causes() {
        let err = DispatchError::exhausted(
            "event-processor",
            DispatchError::timeout(Duration::from_secs(30)),
            "general-assistant",
            DispatchError::network("refused"),
        );
        assert_eq!(err.causes().len(), 2);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("event-processor"));
        assert!(text.contains("general-assistant"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
    }
}
