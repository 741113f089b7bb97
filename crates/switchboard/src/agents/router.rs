//! Router agent consulted by the router-based selection strategy.
//!
//! The engine hands it the request with the candidate keys in
//! `context.metadata["candidates"]`; it answers with the model's JSON routing
//! decision, which the engine decodes and validates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::prompts::ROUTER_SYSTEM;
use dispatch::router::selection::parse_router_reply;
use dispatch::{
    Agent, AgentResult, Capability, DispatchResult, PromptProvider, SharedLanguageModel, Task,
};
use serde_json::Value;

pub struct RouterAgent {
    model: SharedLanguageModel,
    prompts: Arc<dyn PromptProvider>,
    timeout: Duration,
}

impl RouterAgent {
    pub fn new(model: SharedLanguageModel, prompts: Arc<dyn PromptProvider>) -> Self {
        Self {
            model,
            prompts,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn candidates(task: &Task) -> Vec<String> {
    match task.context.metadata.get("candidates") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// User turn for the routing prompt.
pub fn routing_prompt(task: &Task) -> String {
    let mut prompt = format!(
        "Request: {}\nCandidates: {}",
        task.input,
        candidates(task).join(", ")
    );
    for field in ["message_type", "complexity"] {
        if let Some(value) = task.context.field(field) {
            prompt.push_str(&format!("\n{field}: {value}"));
        }
    }
    prompt
}

#[async_trait]
impl Agent for RouterAgent {
    fn name(&self) -> &str {
        "Router"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::new("routing", 1.0)]
    }

    /// Without candidates there is nothing to choose from.
    async fn can_handle(&self, task: &Task) -> bool {
        !candidates(task).is_empty()
    }

    async fn process(&self, task: &Task) -> DispatchResult<AgentResult> {
        let system = self.prompts.get(ROUTER_SYSTEM);
        let reply = self
            .model
            .generate(&system, &routing_prompt(task), 0.0, Some(self.timeout))
            .await?;
        let data = Value::String(reply);
        // Reject undecodable replies here so the strategy logs the cause.
        let decision = parse_router_reply(&data)?;
        Ok(AgentResult::success(data, decision.confidence)
            .with_metadata("target_agent", decision.target_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::TaskContext;

    #[test]
    fn test_routing_prompt_lists_candidates_and_classification() {
        let ctx = TaskContext::new()
            .with_metadata(
                "candidates",
                Value::Array(vec!["qa-specialist".into(), "general-assistant".into()]),
            )
            .with_metadata("message_type", "question");
        let task = Task::new("route", "Why is the sky blue?", ctx);

        let prompt = routing_prompt(&task);
        assert_eq!(
            prompt,
            "Request: Why is the sky blue?\n\
             Candidates: qa-specialist, general-assistant\n\
             message_type: question"
        );
    }

    #[test]
    fn test_candidates_missing_or_malformed() {
        let task = Task::new("route", "hi", TaskContext::new());
        assert!(candidates(&task).is_empty());

        let task = Task::new(
            "route",
            "hi",
            TaskContext::new().with_metadata("candidates", "qa-specialist"),
        );
        assert!(candidates(&task).is_empty());
    }
}
