//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the dispatch path. All spans use
//! dot-notation field names compatible with OpenTelemetry semantic
//! conventions.
//!
//! # Span Hierarchy
//!
//! ```text
//! dispatch.execute          (root, one per orchestrated request)
//!   ├─ dispatch.classify    (cache → pattern → model)
//!   ├─ dispatch.agent       (primary agent through the middleware pipeline)
//!   └─ dispatch.fallback    (fallback agent after a terminal failure)
//! dispatch.queue_task       (background follow-up run by the task queue)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dispatch::otel;
//!
//! let span = otel::agent_span(&execution_id, "qa-specialist");
//! // ... run the agent inside the span ...
//! otel::record_agent_result(&span, true, 2, 840);
//! ```

use tracing::Span;

use crate::error::ErrorKind;

// ── Span Name Constants ──────────────────────────────────────────────

/// Root span for one `Orchestrator::execute` call.
pub const SPAN_EXECUTE: &str = "dispatch.execute";

/// Classification of the raw input.
pub const SPAN_CLASSIFY: &str = "dispatch.classify";

/// Primary agent invocation (pipeline, breaker, retries).
pub const SPAN_AGENT: &str = "dispatch.agent";

/// Single fallback agent invocation.
pub const SPAN_FALLBACK: &str = "dispatch.fallback";

/// Background task executed by the task queue.
pub const SPAN_QUEUE_TASK: &str = "dispatch.queue_task";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_EXECUTION_ID: &str = "dispatch.execution.id";
pub const FIELD_AGENT_KEY: &str = "dispatch.agent.key";
pub const FIELD_PRIMARY_AGENT: &str = "dispatch.agent.primary";
pub const FIELD_MESSAGE_TYPE: &str = "dispatch.message_type";
pub const FIELD_CLASSIFY_SOURCE: &str = "dispatch.classify.source";
pub const FIELD_CONFIDENCE: &str = "dispatch.confidence";
pub const FIELD_SUCCESS: &str = "dispatch.success";
pub const FIELD_ATTEMPTS: &str = "dispatch.attempts";
pub const FIELD_DURATION_MS: &str = "dispatch.duration_ms";
pub const FIELD_ERROR_KIND: &str = "dispatch.error.kind";
pub const FIELD_USED_FALLBACK: &str = "dispatch.used_fallback";
pub const FIELD_TASK_ID: &str = "dispatch.task.id";
pub const FIELD_PRIORITY: &str = "dispatch.priority";

// ── Span Builders ────────────────────────────────────────────────────

/// Root span for one orchestrated request.
///
/// Filled later via [`record_execute_result`]: agent, success, fallback, duration.
pub fn execute_span(execution_id: &str) -> Span {
    tracing::info_span!(
        "dispatch.execute",
        "dispatch.execution.id" = %execution_id,
        "dispatch.agent.key" = tracing::field::Empty,
        "dispatch.success" = tracing::field::Empty,
        "dispatch.used_fallback" = tracing::field::Empty,
        "dispatch.confidence" = tracing::field::Empty,
        "dispatch.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_execute_result(
    span: &Span,
    agent_key: &str,
    success: bool,
    used_fallback: bool,
    confidence: f64,
    duration_ms: u64,
) {
    span.record("dispatch.agent.key", agent_key);
    span.record("dispatch.success", success);
    span.record("dispatch.used_fallback", used_fallback);
    span.record("dispatch.confidence", confidence);
    span.record("dispatch.duration_ms", duration_ms);
}

/// Classification span. Filled later via [`record_classification`].
pub fn classify_span(execution_id: &str) -> Span {
    tracing::info_span!(
        "dispatch.classify",
        "dispatch.execution.id" = %execution_id,
        "dispatch.message_type" = tracing::field::Empty,
        "dispatch.classify.source" = tracing::field::Empty,
        "dispatch.confidence" = tracing::field::Empty,
    )
}

pub fn record_classification(span: &Span, message_type: &str, source: &str, confidence: f64) {
    span.record("dispatch.message_type", message_type);
    span.record("dispatch.classify.source", source);
    span.record("dispatch.confidence", confidence);
}

/// Primary agent span. Filled later via [`record_agent_result`].
pub fn agent_span(execution_id: &str, agent_key: &str) -> Span {
    tracing::info_span!(
        "dispatch.agent",
        "dispatch.execution.id" = %execution_id,
        "dispatch.agent.key" = %agent_key,
        "dispatch.success" = tracing::field::Empty,
        "dispatch.attempts" = tracing::field::Empty,
        "dispatch.duration_ms" = tracing::field::Empty,
        "dispatch.error.kind" = tracing::field::Empty,
    )
}

pub fn record_agent_result(span: &Span, success: bool, attempts: u32, duration_ms: u64) {
    span.record("dispatch.success", success);
    span.record("dispatch.attempts", attempts);
    span.record("dispatch.duration_ms", duration_ms);
}

/// Tag a span (agent, fallback or queue task) with the failure kind.
pub fn record_error_kind(span: &Span, kind: ErrorKind) {
    span.record("dispatch.error.kind", tracing::field::display(kind));
}

/// Fallback agent span. Filled later via [`record_agent_result`].
pub fn fallback_span(execution_id: &str, fallback_key: &str, primary_key: &str) -> Span {
    tracing::info_span!(
        "dispatch.fallback",
        "dispatch.execution.id" = %execution_id,
        "dispatch.agent.key" = %fallback_key,
        "dispatch.agent.primary" = %primary_key,
        "dispatch.success" = tracing::field::Empty,
        "dispatch.attempts" = tracing::field::Empty,
        "dispatch.duration_ms" = tracing::field::Empty,
        "dispatch.error.kind" = tracing::field::Empty,
    )
}

/// Queue task span. Filled later via [`record_queue_task_result`].
pub fn queue_task_span(task_id: &str, agent_key: &str, priority: i32) -> Span {
    tracing::info_span!(
        "dispatch.queue_task",
        "dispatch.task.id" = %task_id,
        "dispatch.agent.key" = %agent_key,
        "dispatch.priority" = priority,
        "dispatch.success" = tracing::field::Empty,
        "dispatch.duration_ms" = tracing::field::Empty,
        "dispatch.error.kind" = tracing::field::Empty,
    )
}

pub fn record_queue_task_result(span: &Span, success: bool, duration_ms: u64) {
    span.record("dispatch.success", success);
    span.record("dispatch.duration_ms", duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Initialize a test subscriber so spans are not disabled.
    fn init_test_subscriber() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .try_init();
        });
    }

    #[test]
    fn test_execute_span_creates_valid_span() {
        init_test_subscriber();
        let span = execute_span("exec-1");
        assert!(!span.is_disabled());
        record_execute_result(&span, "qa-specialist", true, false, 0.8, 120);
    }

    #[test]
    fn test_classify_span_creates_valid_span() {
        init_test_subscriber();
        let span = classify_span("exec-1");
        assert!(!span.is_disabled());
        record_classification(&span, "question", "pattern", 0.8);
    }

    #[test]
    fn test_agent_and_fallback_spans() {
        init_test_subscriber();
        let span = agent_span("exec-1", "event-processor");
        assert!(!span.is_disabled());
        record_agent_result(&span, false, 3, 30_000);
        record_error_kind(&span, ErrorKind::Timeout);

        let span = fallback_span("exec-1", "general-assistant", "event-processor");
        assert!(!span.is_disabled());
        record_agent_result(&span, true, 1, 40);
    }

    #[test]
    fn test_queue_task_span_creates_valid_span() {
        init_test_subscriber();
        let span = queue_task_span("task-1", "qa-specialist", 5);
        assert!(!span.is_disabled());
        record_queue_task_result(&span, true, 15);
    }

    #[test]
    fn test_span_names_use_dispatch_prefix() {
        for name in [SPAN_EXECUTE, SPAN_CLASSIFY, SPAN_AGENT, SPAN_FALLBACK, SPAN_QUEUE_TASK] {
            assert!(name.starts_with("dispatch."), "{name}");
        }
        assert!(FIELD_ERROR_KIND.starts_with("dispatch."));
    }
}
