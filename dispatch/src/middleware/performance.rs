//! Wall-clock capture attached to result metadata as `duration_ms`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::{BeforeOutcome, Invocation, Middleware};
use crate::error::{DispatchError, DispatchResult};
use crate::types::AgentResult;

#[derive(Default)]
pub struct PerformanceMiddleware {
    started: Mutex<HashMap<Uuid, Instant>>,
}

impl PerformanceMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&self, id: &Uuid) -> Option<Instant> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Invocations started but not finished.
    pub fn in_flight(&self) -> usize {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Middleware for PerformanceMiddleware {
    fn name(&self) -> &str {
        "performance"
    }

    fn priority(&self) -> i32 {
        50
    }

    async fn before(&self, invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(invocation.id, Instant::now());
        Ok(BeforeOutcome::Continue)
    }

    async fn after(
        &self,
        invocation: &Invocation,
        result: AgentResult,
    ) -> DispatchResult<AgentResult> {
        match self.take(&invocation.id) {
            Some(start) => {
                let ms = start.elapsed().as_millis() as u64;
                Ok(result.with_metadata("duration_ms", ms))
            }
            None => Ok(result),
        }
    }

    async fn on_error(&self, invocation: &Invocation, _error: &DispatchError) -> Option<AgentResult> {
        self.take(&invocation.id);
        None
    }
}
