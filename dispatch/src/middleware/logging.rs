use async_trait::async_trait;
use tracing::{info, warn};

use super::{BeforeOutcome, Invocation, Middleware};
use crate::error::{DispatchError, DispatchResult};
use crate::types::AgentResult;

/// Structured log lines around every agent invocation.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        40
    }

    async fn before(&self, invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        info!(
            invocation = %invocation.id,
            agent = %invocation.agent_key,
            task_type = %invocation.task.task_type,
            input_chars = invocation.task.input.chars().count(),
            "Invoking agent"
        );
        Ok(BeforeOutcome::Continue)
    }

    async fn after(
        &self,
        invocation: &Invocation,
        result: AgentResult,
    ) -> DispatchResult<AgentResult> {
        info!(
            invocation = %invocation.id,
            agent = %invocation.agent_key,
            success = result.success,
            confidence = result.confidence,
            "Agent returned"
        );
        Ok(result)
    }

    async fn on_error(&self, invocation: &Invocation, error: &DispatchError) -> Option<AgentResult> {
        warn!(
            invocation = %invocation.id,
            agent = %invocation.agent_key,
            kind = %error.kind(),
            retryable = error.is_retryable(),
            "Agent invocation failed: {error}"
        );
        None
    }
}
