//! The handler interface every routable agent implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchResult;
use crate::types::{AgentResult, Task};

/// A capability tag with the agent's self-reported confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub tag: String,
    /// Confidence (0.0–1.0).
    pub confidence: f64,
}

impl Capability {
    pub fn new(tag: impl Into<String>, confidence: f64) -> Self {
        Self {
            tag: tag.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A specialised handler the orchestrator can route requests to.
///
/// Implementations are independent; they only meet through the registry.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name. The registry key is derived from it.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    /// Cheap pre-check; returning `false` counts as a terminal failure for
    /// this agent and sends the request to the fallback.
    async fn can_handle(&self, _task: &Task) -> bool {
        true
    }

    async fn process(&self, task: &Task) -> DispatchResult<AgentResult>;
}

/// Shared handle to a registered agent.
pub type SharedAgent = Arc<dyn Agent>;
