//! Dispatch engine configuration.
//!
//! Loaded from TOML (every section optional) and then adjusted by a small set
//! of `DISPATCH_*` environment variables:
//!
//! | Variable                              | Field                                |
//! |---------------------------------------|--------------------------------------|
//! | `DISPATCH_EXECUTION_TIMEOUT_MS`       | `orchestrator.execution_timeout_ms`  |
//! | `DISPATCH_AGENT_TIMEOUT_MS`           | `orchestrator.agent_timeout_ms`      |
//! | `DISPATCH_MAX_RETRIES`                | `retry.max_retries`                  |
//! | `DISPATCH_RETRY_STRATEGY`             | `retry.strategy`                     |
//! | `DISPATCH_QUEUE_CONCURRENCY`          | `queue.max_concurrency`              |
//! | `DISPATCH_QUEUE_CAPACITY`             | `queue.max_pending`                  |
//! | `DISPATCH_FALLBACK_AGENT`             | `orchestrator.fallback_agent`        |
//! | `DISPATCH_SELECTION`                  | `orchestrator.selection`             |
//! | `DISPATCH_CLASSIFIER_CACHE_TTL_SECS`  | `classifier.cache_ttl_secs`          |

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DispatchError, DispatchResult};
use crate::retry::{ExponentialBackoff, FixedDelay, LinearBackoff, RetryKind, RetryPolicy};
use crate::router::{RoutingTable, SelectionKind};
use crate::types::MessageType;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Prompt template overrides keyed by template key.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    /// Routing rows replacing the defaults for the listed message types.
    #[serde(default)]
    pub routes: HashMap<MessageType, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Confidence assigned to pattern-table matches.
    pub pattern_confidence: f64,
    /// Confidence assigned to the bare-label fallback.
    pub fallback_confidence: f64,
    pub temperature: f32,
    pub model_timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            cache_max_entries: 1_000,
            pattern_confidence: 0.8,
            fallback_confidence: 0.4,
            temperature: 0.1,
            model_timeout_ms: 10_000,
        }
    }
}

impl ClassifierConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryKind,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Exponential only.
    pub multiplier: f64,
    /// Exponential only.
    pub max_delay_ms: u64,
    /// Exponential only.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryKind::Exponential,
            max_retries: 2,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn build_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.strategy {
            RetryKind::Exponential => RetryPolicy::new(
                std::sync::Arc::new(
                    ExponentialBackoff::new(
                        self.multiplier,
                        Duration::from_millis(self.max_delay_ms),
                    )
                    .with_jitter(self.jitter),
                ),
                self.max_retries,
                base,
            ),
            RetryKind::Linear => {
                RetryPolicy::new(std::sync::Arc::new(LinearBackoff), self.max_retries, base)
            }
            RetryKind::Fixed => {
                RetryPolicy::new(std::sync::Arc::new(FixedDelay), self.max_retries, base)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub max_input_chars: usize,
    /// Context fields that must be present and non-empty.
    pub required_context: Vec<String>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_ms: u64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 8_000,
            required_context: Vec::new(),
            rate_limit_max_requests: 30,
            rate_limit_window_ms: 60_000,
            cache_enabled: true,
            cache_ttl_secs: 60,
            cache_max_entries: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    /// Pending entries beyond this are rejected.
    pub max_pending: usize,
    /// Delay before newly enqueued entries are admitted.
    pub tick_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_pending: 1_000,
            tick_ms: 100,
        }
    }
}

impl QueueConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard deadline for the primary path (pipeline + retries).
    pub execution_timeout_ms: u64,
    /// Deadline for a single agent invocation.
    pub agent_timeout_ms: u64,
    pub fallback_agent: String,
    pub selection: SelectionKind,
    /// Agent consulted by the router-based strategy.
    pub router_agent: String,
    /// Weights for the weighted-random strategy.
    pub weights: HashMap<String, u32>,
    /// Multiplier applied to routing confidence when the target is corrected.
    pub invalid_target_penalty: f64,
    pub history_limit: usize,
    pub follow_up_priority: i32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 30_000,
            agent_timeout_ms: 10_000,
            fallback_agent: "general-assistant".to_string(),
            selection: SelectionKind::Capability,
            router_agent: "router".to_string(),
            weights: HashMap::new(),
            invalid_target_penalty: 0.5,
            history_limit: 10,
            follow_up_priority: 0,
        }
    }
}

impl OrchestratorConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub max_samples_per_agent: usize,
    pub retention_secs: u64,
    /// Samples required before thresholds are evaluated.
    pub min_samples: usize,
    pub alert_cooldown_secs: u64,
    pub alert_history: usize,
    pub success_rate_warning: f64,
    pub success_rate_critical: f64,
    pub p95_latency_warning_ms: f64,
    pub p95_latency_critical_ms: f64,
    pub avg_retries_warning: f64,
    pub avg_retries_critical: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_samples_per_agent: 1_000,
            retention_secs: 3_600,
            min_samples: 5,
            alert_cooldown_secs: 300,
            alert_history: 100,
            success_rate_warning: 0.9,
            success_rate_critical: 0.75,
            p95_latency_warning_ms: 5_000.0,
            p95_latency_critical_ms: 15_000.0,
            avg_retries_warning: 1.0,
            avg_retries_critical: 2.0,
        }
    }
}

impl DispatchConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> DispatchResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> DispatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(var = name, value = %raw, "Ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "DISPATCH_EXECUTION_TIMEOUT_MS") {
            self.orchestrator.execution_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_AGENT_TIMEOUT_MS") {
            self.orchestrator.agent_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MAX_RETRIES") {
            self.retry.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_QUEUE_CONCURRENCY") {
            self.queue.max_concurrency = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_QUEUE_CAPACITY") {
            self.queue.max_pending = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_CLASSIFIER_CACHE_TTL_SECS") {
            self.classifier.cache_ttl_secs = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_SELECTION") {
            self.orchestrator.selection = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_RETRY_STRATEGY") {
            self.retry.strategy = v;
        }
        if let Some(v) = lookup("DISPATCH_FALLBACK_AGENT") {
            self.orchestrator.fallback_agent = v.trim().to_string();
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> DispatchResult<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(DispatchError::configuration(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        let positive = |name: &str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(DispatchError::configuration(format!("{name} must be positive")))
            }
        };

        unit("classifier.pattern_confidence", self.classifier.pattern_confidence)?;
        unit("classifier.fallback_confidence", self.classifier.fallback_confidence)?;
        unit(
            "orchestrator.invalid_target_penalty",
            self.orchestrator.invalid_target_penalty,
        )?;
        unit("monitor.success_rate_warning", self.monitor.success_rate_warning)?;
        unit("monitor.success_rate_critical", self.monitor.success_rate_critical)?;

        positive(
            "circuit_breaker.failure_threshold",
            self.circuit_breaker.failure_threshold > 0,
        )?;
        positive("queue.max_concurrency", self.queue.max_concurrency > 0)?;
        positive("queue.max_pending", self.queue.max_pending > 0)?;
        positive("queue.tick_ms", self.queue.tick_ms > 0)?;
        positive(
            "orchestrator.execution_timeout_ms",
            self.orchestrator.execution_timeout_ms > 0,
        )?;
        positive(
            "orchestrator.agent_timeout_ms",
            self.orchestrator.agent_timeout_ms > 0,
        )?;
        positive(
            "middleware.rate_limit_max_requests",
            self.middleware.rate_limit_max_requests > 0,
        )?;
        positive(
            "middleware.rate_limit_window_ms",
            self.middleware.rate_limit_window_ms > 0,
        )?;
        positive("middleware.max_input_chars", self.middleware.max_input_chars > 0)?;
        positive(
            "monitor.max_samples_per_agent",
            self.monitor.max_samples_per_agent > 0,
        )?;

        if self.retry.strategy == RetryKind::Exponential && self.retry.multiplier < 1.0 {
            return Err(DispatchError::configuration(
                "retry.multiplier must be at least 1.0",
            ));
        }
        if self.orchestrator.fallback_agent.trim().is_empty() {
            return Err(DispatchError::configuration(
                "orchestrator.fallback_agent must not be empty",
            ));
        }
        if self.monitor.success_rate_critical > self.monitor.success_rate_warning {
            return Err(DispatchError::configuration(
                "monitor.success_rate_critical must not exceed success_rate_warning",
            ));
        }
        Ok(())
    }

    /// Default routing table with the configured rows applied.
    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::with_overrides(&self.routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queue.max_concurrency, 3);
        assert_eq!(config.orchestrator.execution_timeout(), Duration::from_secs(30));
        assert_eq!(config.classifier.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DispatchConfig::from_toml_str(
            r#"
            [queue]
            max_concurrency = 8

            [orchestrator]
            selection = "round_robin"
            fallback_agent = "helper"

            [routes]
            event = ["calendar", "event-processor"]

            [prompts]
            "router.system" = "route it"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_concurrency, 8);
        assert_eq!(config.queue.max_pending, 1_000);
        assert_eq!(config.orchestrator.selection, SelectionKind::RoundRobin);
        assert_eq!(config.orchestrator.fallback_agent, "helper");
        assert_eq!(config.prompts["router.system"], "route it");

        let table = config.routing_table();
        assert_eq!(
            table.candidates(MessageType::Event),
            ["calendar", "event-processor"]
        );
        assert_eq!(table.candidates(MessageType::Chat), ["general-assistant"]);
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = DispatchConfig::from_toml_str("[queue\nmax = ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nstrategy = \"linear\"\nmax_retries = 4").unwrap();
        let config = DispatchConfig::load(file.path()).unwrap();
        assert_eq!(config.retry.strategy, RetryKind::Linear);
        assert_eq!(config.retry.max_retries, 4);

        let missing = DispatchConfig::load(Path::new("/nonexistent/dispatch.toml"));
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DISPATCH_EXECUTION_TIMEOUT_MS", "5000"),
            ("DISPATCH_MAX_RETRIES", "not-a-number"),
            ("DISPATCH_QUEUE_CONCURRENCY", "6"),
            ("DISPATCH_FALLBACK_AGENT", " helper "),
            ("DISPATCH_SELECTION", "weighted_random"),
            ("DISPATCH_CLASSIFIER_CACHE_TTL_SECS", "30"),
        ]
        .into_iter()
        .collect();
        let mut config = DispatchConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.orchestrator.execution_timeout_ms, 5_000);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.queue.max_concurrency, 6);
        assert_eq!(config.orchestrator.fallback_agent, "helper");
        assert_eq!(config.orchestrator.selection, SelectionKind::WeightedRandom);
        assert_eq!(config.classifier.cache_ttl_secs, 30);
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut config = DispatchConfig::default();
        config.queue.max_concurrency = 0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let mut config = DispatchConfig::default();
        config.classifier.pattern_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.orchestrator.fallback_agent = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_policy_uses_strategy() {
        let mut retry = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let policy = retry.build_policy();
        assert_eq!(
            policy.strategy().get_delay(2, Duration::from_millis(100)),
            Duration::from_millis(400)
        );
        retry.strategy = RetryKind::Linear;
        assert_eq!(
            retry
                .build_policy()
                .strategy()
                .get_delay(2, Duration::from_millis(100)),
            Duration::from_millis(300)
        );
    }
}
