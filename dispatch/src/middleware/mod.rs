//! Middleware Pipeline: ordered cross-cutting steps around agent calls
//!
//! Every step may hook three points:
//!
//! ```text
//! before   ascending priority   may rewrite the invocation or short-circuit
//! terminal                      the actual agent call (breaker, retries, timeout)
//! after    descending priority  may rewrite the result
//! on_error ascending priority   first step returning Some(result) recovers
//! ```
//!
//! A short-circuit in `before` (a cache hit) skips the terminal call and the
//! `before` hooks of later steps; `after` then runs only for the steps whose
//! `before` already ran, excluding the short-circuiting one.
//!
//! Standard steps, by priority: [`ValidationMiddleware`] (10),
//! [`RateLimitMiddleware`] (20), [`CacheMiddleware`] (30),
//! [`LoggingMiddleware`] (40), [`PerformanceMiddleware`] (50).

pub mod cache;
pub mod logging;
pub mod performance;
pub mod rate_limit;
pub mod validation;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::MiddlewareConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::types::{AgentResult, Task};

pub use cache::CacheMiddleware;
pub use logging::LoggingMiddleware;
pub use performance::PerformanceMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use validation::ValidationMiddleware;

/// One pass of a task through the pipeline towards an agent.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: Uuid,
    pub agent_key: String,
    pub task: Task,
    /// Fallback for a request whose primary invocation was already admitted.
    pub fallback: bool,
}

impl Invocation {
    pub fn new(agent_key: impl Into<String>, task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_key: agent_key.into(),
            task,
            fallback: false,
        }
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

/// What a `before` hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeOutcome {
    Continue,
    /// Skip the agent and use this result.
    ShortCircuit(AgentResult),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs earlier in `before`.
    fn priority(&self) -> i32;

    async fn before(&self, _invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        Ok(BeforeOutcome::Continue)
    }

    async fn after(
        &self,
        _invocation: &Invocation,
        result: AgentResult,
    ) -> DispatchResult<AgentResult> {
        Ok(result)
    }

    async fn on_error(
        &self,
        _invocation: &Invocation,
        _error: &DispatchError,
    ) -> Option<AgentResult> {
        None
    }
}

pub type SharedMiddleware = Arc<dyn Middleware>;

/// Priority-ordered chain of steps.
#[derive(Default, Clone)]
pub struct MiddlewarePipeline {
    steps: Vec<SharedMiddleware>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five standard steps configured from `config`.
    pub fn standard(config: &MiddlewareConfig) -> Self {
        let mut pipeline = Self::new()
            .with(Arc::new(ValidationMiddleware::new(
                config.max_input_chars,
                config.required_context.clone(),
            )))
            .with(Arc::new(RateLimitMiddleware::new(
                config.rate_limit_max_requests,
                Duration::from_millis(config.rate_limit_window_ms),
            )))
            .with(Arc::new(LoggingMiddleware))
            .with(Arc::new(PerformanceMiddleware::new()));
        if config.cache_enabled {
            pipeline.add(Arc::new(CacheMiddleware::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            )));
        }
        pipeline
    }

    /// Insert a step, keeping priority order (stable for equal priorities).
    pub fn add(&mut self, step: SharedMiddleware) {
        let index = self
            .steps
            .iter()
            .position(|s| s.priority() > step.priority())
            .unwrap_or(self.steps.len());
        self.steps.insert(index, step);
    }

    pub fn with(mut self, step: SharedMiddleware) -> Self {
        self.add(step);
        self
    }

    /// Step names in `before` order.
    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run `invocation` through every step around `terminal`.
    pub async fn run<F, Fut>(&self, invocation: Invocation, terminal: F) -> DispatchResult<AgentResult>
    where
        F: FnOnce(Task) -> Fut,
        Fut: Future<Output = DispatchResult<AgentResult>>,
    {
        let mut invocation = invocation;
        match self.run_inner(&mut invocation, terminal).await {
            Ok(result) => Ok(result),
            Err(err) => {
                for step in &self.steps {
                    if let Some(recovered) = step.on_error(&invocation, &err).await {
                        debug!(step = step.name(), error = %err, "Middleware recovered error");
                        return Ok(recovered);
                    }
                }
                Err(err)
            }
        }
    }

    async fn run_inner<F, Fut>(
        &self,
        invocation: &mut Invocation,
        terminal: F,
    ) -> DispatchResult<AgentResult>
    where
        F: FnOnce(Task) -> Fut,
        Fut: Future<Output = DispatchResult<AgentResult>>,
    {
        let mut ran = 0usize;
        let mut short_circuit = None;
        for step in &self.steps {
            match step.before(invocation).await? {
                BeforeOutcome::Continue => ran += 1,
                BeforeOutcome::ShortCircuit(result) => {
                    debug!(step = step.name(), agent = %invocation.agent_key, "Short-circuited");
                    short_circuit = Some(result);
                    break;
                }
            }
        }

        let mut result = match short_circuit {
            Some(result) => result,
            None => terminal(invocation.task.clone()).await?,
        };

        for step in self.steps[..ran].iter().rev() {
            result = step.after(invocation, result).await?;
        }
        Ok(result)
    }
}
