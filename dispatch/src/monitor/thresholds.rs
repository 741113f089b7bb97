//! Threshold targets for per-agent health.
//!
//! Each target has warning and critical thresholds and a direction. A metric
//! that crosses the warning threshold degrades the agent; crossing the
//! critical threshold makes it unhealthy.
//!
//! | Metric | Warning | Critical | Direction |
//! |---|---|---|---|
//! | Success rate | < 0.90 | < 0.75 | Higher is better |
//! | P95 latency | > 5s | > 15s | Lower is better |
//! | Avg retry attempts | > 1.0 | > 2.0 | Lower is better |

use serde::{Deserialize, Serialize};

use super::AgentStats;
use crate::config::MonitorConfig;

/// Alert severity level for a threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Metric within target.
    Ok,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Whether higher or lower values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Which [`AgentStats`] field a target reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMetric {
    SuccessRate,
    LatencyP95,
    AvgRetries,
}

impl MonitorMetric {
    pub fn read(self, stats: &AgentStats) -> f64 {
        match self {
            Self::SuccessRate => stats.success_rate,
            Self::LatencyP95 => stats.p95_latency_ms,
            Self::AvgRetries => stats.avg_retry_attempts,
        }
    }
}

impl std::fmt::Display for MonitorMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuccessRate => write!(f, "success_rate"),
            Self::LatencyP95 => write!(f, "latency_p95"),
            Self::AvgRetries => write!(f, "avg_retries"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdTarget {
    pub metric: MonitorMetric,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub direction: MetricDirection,
    /// Unit label for display (e.g., "ms").
    pub unit: String,
}

impl ThresholdTarget {
    /// Evaluate a metric value against this target's thresholds.
    pub fn evaluate(&self, value: f64) -> AlertSeverity {
        match self.direction {
            MetricDirection::HigherIsBetter => {
                if value >= self.warning_threshold {
                    AlertSeverity::Ok
                } else if value >= self.critical_threshold {
                    AlertSeverity::Warning
                } else {
                    AlertSeverity::Critical
                }
            }
            MetricDirection::LowerIsBetter => {
                if value <= self.warning_threshold {
                    AlertSeverity::Ok
                } else if value <= self.critical_threshold {
                    AlertSeverity::Warning
                } else {
                    AlertSeverity::Critical
                }
            }
        }
    }

    /// The threshold that `severity` was measured against.
    pub fn threshold_for(&self, severity: AlertSeverity) -> f64 {
        match severity {
            AlertSeverity::Critical => self.critical_threshold,
            _ => self.warning_threshold,
        }
    }
}

/// Targets built from the monitor configuration.
pub fn targets_from_config(config: &MonitorConfig) -> Vec<ThresholdTarget> {
    vec![
        ThresholdTarget {
            metric: MonitorMetric::SuccessRate,
            warning_threshold: config.success_rate_warning,
            critical_threshold: config.success_rate_critical,
            direction: MetricDirection::HigherIsBetter,
            unit: String::new(),
        },
        ThresholdTarget {
            metric: MonitorMetric::LatencyP95,
            warning_threshold: config.p95_latency_warning_ms,
            critical_threshold: config.p95_latency_critical_ms,
            direction: MetricDirection::LowerIsBetter,
            unit: "ms".into(),
        },
        ThresholdTarget {
            metric: MonitorMetric::AvgRetries,
            warning_threshold: config.avg_retries_warning,
            critical_threshold: config.avg_retries_critical,
            direction: MetricDirection::LowerIsBetter,
            unit: String::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_is_better_bands() {
        let target = &targets_from_config(&MonitorConfig::default())[0];
        assert_eq!(target.evaluate(0.95), AlertSeverity::Ok);
        assert_eq!(target.evaluate(0.9), AlertSeverity::Ok);
        assert_eq!(target.evaluate(0.8), AlertSeverity::Warning);
        assert_eq!(target.evaluate(0.5), AlertSeverity::Critical);
    }

    #[test]
    fn test_lower_is_better_bands() {
        let target = &targets_from_config(&MonitorConfig::default())[1];
        assert_eq!(target.metric, MonitorMetric::LatencyP95);
        assert_eq!(target.evaluate(1_000.0), AlertSeverity::Ok);
        assert_eq!(target.evaluate(6_000.0), AlertSeverity::Warning);
        assert_eq!(target.evaluate(20_000.0), AlertSeverity::Critical);
        assert_eq!(target.threshold_for(AlertSeverity::Critical), 15_000.0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Ok);
    }
}
