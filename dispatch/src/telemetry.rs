//! Fire-and-forget telemetry sinks.
//!
//! One event is emitted per orchestrated request. Emitting must never block
//! or fail the request path: sinks drop events they cannot accept.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Scalar telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for TelemetryValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub operation_id: String,
    pub metadata: BTreeMap<String, TelemetryValue>,
}

impl TelemetryEvent {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<TelemetryValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Destination for telemetry events. Must not block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

pub type SharedTelemetrySink = Arc<dyn TelemetrySink>;

/// Writes events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        let fields = event
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            target: "dispatch::telemetry",
            operation_id = %event.operation_id,
            "{fields}"
        );
    }
}

/// Hands events to a bounded channel; drops them when the consumer lags.
#[derive(Debug)]
pub struct ChannelTelemetrySink {
    sender: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

impl ChannelTelemetrySink {
    /// Create the sink and the receiving end the exporter task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Events discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        if let Err(e) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Telemetry event dropped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_and_drops_when_full() {
        let (sink, mut rx) = ChannelTelemetrySink::new(1);
        sink.emit(TelemetryEvent::new("a").with("success", true));
        sink.emit(TelemetryEvent::new("b"));
        assert_eq!(sink.dropped(), 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.operation_id, "a");
        assert_eq!(first.metadata.get("success"), Some(&TelemetryValue::Bool(true)));
    }

    #[test]
    fn values_serialize_as_scalars() {
        let event = TelemetryEvent::new("op")
            .with("agent", "qa-specialist")
            .with("attempts", 2u32)
            .with("confidence", 0.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["metadata"]["agent"], "qa-specialist");
        assert_eq!(json["metadata"]["attempts"], 2);
        assert_eq!(json["metadata"]["confidence"], 0.5);
    }
}
