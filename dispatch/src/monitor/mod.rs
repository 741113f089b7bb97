//! Execution metrics, per-agent health and threshold alerts.
//!
//! Every handler invocation produces one [`ExecutionMetric`]. Samples are kept
//! per agent in a ring buffer bounded by count and by age. After each record
//! the agent's statistics are evaluated against the [`ThresholdTarget`]s; a
//! breach raises an [`Alert`] unless the same (agent, metric) pair alerted at
//! the same or higher severity within the cooldown.
//!
//! Alerts are kept in a bounded history and broadcast to live subscribers.

pub mod thresholds;

pub use thresholds::{
    targets_from_config, AlertSeverity, MetricDirection, MonitorMetric, ThresholdTarget,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::ErrorKind;

/// Live alert channel capacity.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// One handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetric {
    pub agent_key: String,
    pub execution_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub success: bool,
    /// Retries beyond the first attempt.
    pub retry_attempts: u32,
    pub error_kind: Option<ErrorKind>,
    pub confidence: Option<f64>,
}

impl ExecutionMetric {
    /// A metric for an invocation starting now.
    pub fn start(agent_key: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            agent_key: agent_key.into(),
            execution_id,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            success: false,
            retry_attempts: 0,
            error_kind: None,
            confidence: None,
        }
    }

    /// Mark the invocation finished after `elapsed`.
    pub fn finish(mut self, success: bool, elapsed: Duration) -> Self {
        self.success = success;
        self.duration_ms = Some(elapsed.as_millis() as u64);
        self.end_time = chrono::Duration::from_std(elapsed)
            .ok()
            .map(|d| self.start_time + d);
        self
    }

    pub fn with_retries(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_error(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Aggregates over the retained samples of one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStats {
    pub agent_key: String,
    pub samples: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_retry_attempts: f64,
    pub avg_confidence: Option<f64>,
    /// Failure count per error kind label.
    pub error_breakdown: BTreeMap<String, usize>,
}

impl AgentStats {
    fn compute(agent_key: &str, samples: &VecDeque<(Instant, ExecutionMetric)>) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self {
                agent_key: agent_key.to_string(),
                ..Self::default()
            };
        }
        let successes = samples.iter().filter(|(_, m)| m.success).count();

        let mut latencies: Vec<u64> = samples.iter().filter_map(|(_, m)| m.duration_ms).collect();
        latencies.sort_unstable();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        let confidences: Vec<f64> = samples.iter().filter_map(|(_, m)| m.confidence).collect();
        let avg_confidence = (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64);

        let mut error_breakdown = BTreeMap::new();
        for (_, metric) in samples.iter().filter(|(_, m)| !m.success) {
            let label = metric
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".into());
            *error_breakdown.entry(label).or_insert(0) += 1;
        }

        Self {
            agent_key: agent_key.to_string(),
            samples: n,
            successes,
            failures: n - successes,
            success_rate: successes as f64 / n as f64,
            avg_latency_ms,
            p95_latency_ms: percentile(&latencies, 95) as f64,
            avg_retry_attempts: samples
                .iter()
                .map(|(_, m)| m.retry_attempts as f64)
                .sum::<f64>()
                / n as f64,
            avg_confidence,
            error_breakdown,
        }
    }
}

/// p-th percentile of a sorted slice (nearest rank, floor index).
fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
    sorted[idx]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl From<AlertSeverity> for HealthStatus {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Ok => Self::Healthy,
            AlertSeverity::Warning => Self::Degraded,
            AlertSeverity::Critical => Self::Unhealthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status across agents; healthy when nothing was recorded.
    pub overall: HealthStatus,
    pub agents: BTreeMap<String, HealthStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub agent_key: String,
    pub metric: MonitorMetric,
    pub severity: AlertSeverity,
    pub observed: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Default)]
struct MonitorState {
    samples: HashMap<String, VecDeque<(Instant, ExecutionMetric)>>,
    alerts: VecDeque<Alert>,
    last_alert: HashMap<(String, MonitorMetric), (Instant, AlertSeverity)>,
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    targets: Vec<ThresholdTarget>,
    state: Mutex<MonitorState>,
    alerts_tx: broadcast::Sender<Alert>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let targets = targets_from_config(&config);
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            config,
            targets,
            state: Mutex::new(MonitorState::default()),
            alerts_tx,
        }
    }

    pub fn with_targets(mut self, targets: Vec<ThresholdTarget>) -> Self {
        self.targets = targets;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store one sample and return the alerts it raised.
    pub fn record(&self, metric: ExecutionMetric) -> Vec<Alert> {
        let now = Instant::now();
        let retention = Duration::from_secs(self.config.retention_secs);
        let key = metric.agent_key.clone();
        debug!(
            agent = %key,
            success = metric.success,
            retries = metric.retry_attempts,
            duration_ms = metric.duration_ms.unwrap_or(0),
            "Execution metric recorded"
        );

        let mut state = self.lock();
        let samples = state.samples.entry(key.clone()).or_default();
        samples.push_back((now, metric));
        while samples.len() > self.config.max_samples_per_agent.max(1) {
            samples.pop_front();
        }
        while samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > retention)
        {
            samples.pop_front();
        }
        if samples.len() < self.config.min_samples {
            return Vec::new();
        }
        let stats = AgentStats::compute(&key, samples);

        let cooldown = Duration::from_secs(self.config.alert_cooldown_secs);
        let mut raised = Vec::new();
        for target in &self.targets {
            let observed = target.metric.read(&stats);
            let severity = target.evaluate(observed);
            if severity == AlertSeverity::Ok {
                continue;
            }
            let slot = (key.clone(), target.metric);
            let suppressed = state.last_alert.get(&slot).is_some_and(|(at, last)| {
                now.duration_since(*at) < cooldown && severity <= *last
            });
            if suppressed {
                continue;
            }
            state.last_alert.insert(slot, (now, severity));

            let threshold = target.threshold_for(severity);
            let alert = Alert {
                agent_key: key.clone(),
                metric: target.metric,
                severity,
                observed,
                threshold,
                message: format!(
                    "{key}: {} {observed:.2}{} breached {threshold:.2}{} [{severity}]",
                    target.metric, target.unit, target.unit
                ),
                raised_at: Utc::now(),
            };
            warn!(
                agent = %key,
                metric = %target.metric,
                severity = %severity,
                observed,
                threshold,
                "Performance alert"
            );
            state.alerts.push_back(alert.clone());
            while state.alerts.len() > self.config.alert_history {
                state.alerts.pop_front();
            }
            // No subscribers is fine.
            let _ = self.alerts_tx.send(alert.clone());
            raised.push(alert);
        }
        raised
    }

    pub fn agent_stats(&self, agent_key: &str) -> Option<AgentStats> {
        let state = self.lock();
        state
            .samples
            .get(agent_key)
            .map(|samples| AgentStats::compute(agent_key, samples))
    }

    pub fn all_stats(&self) -> BTreeMap<String, AgentStats> {
        let state = self.lock();
        state
            .samples
            .iter()
            .map(|(key, samples)| (key.clone(), AgentStats::compute(key, samples)))
            .collect()
    }

    /// Healthy until `min_samples` are retained; then the worst target severity.
    pub fn agent_health(&self, agent_key: &str) -> HealthStatus {
        match self.agent_stats(agent_key) {
            Some(stats) => self.health_of(&stats),
            None => HealthStatus::Healthy,
        }
    }

    fn health_of(&self, stats: &AgentStats) -> HealthStatus {
        if stats.samples < self.config.min_samples {
            return HealthStatus::Healthy;
        }
        self.targets
            .iter()
            .map(|t| t.evaluate(t.metric.read(stats)))
            .max()
            .map(HealthStatus::from)
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn health(&self) -> HealthReport {
        let agents: BTreeMap<String, HealthStatus> = self
            .all_stats()
            .into_iter()
            .map(|(key, stats)| {
                let status = self.health_of(&stats);
                (key, status)
            })
            .collect();
        let overall = agents
            .values()
            .copied()
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthReport { overall, agents }
    }

    /// Newest last.
    pub fn recent_metrics(&self, agent_key: &str, limit: usize) -> Vec<ExecutionMetric> {
        let state = self.lock();
        state
            .samples
            .get(agent_key)
            .map(|samples| {
                let skip = samples.len().saturating_sub(limit);
                samples.iter().skip(skip).map(|(_, m)| m.clone()).collect()
            })
            .unwrap_or_default()
    }

    /// Newest last.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let state = self.lock();
        let skip = state.alerts.len().saturating_sub(limit);
        state.alerts.iter().skip(skip).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    pub fn reset(&self) {
        *self.lock() = MonitorState::default();
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
