//! Specialist agents registered with the dispatch engine.
//!
//! Every specialist is a [`PromptAgent`]: a display name, capability tags and
//! a preamble in front of the shared language model. The router is separate
//! because it answers the engine, not the user.

pub mod router;
pub mod specialists;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::llm::extract_json_object;
use dispatch::{
    Agent, AgentRegistry, AgentResult, Capability, DispatchResult, MessageRole,
    PromptProvider, SharedLanguageModel, Task,
};
use serde_json::Value;
use tracing::debug;

pub use router::RouterAgent;

const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(20);

/// How a specialist's reply is turned into result data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    /// Reply text is the data.
    Text,
    /// The first JSON object in the reply is the data; plain text is kept
    /// at reduced confidence when the model ignores the format.
    Json,
}

/// A specialist backed by the language model.
pub struct PromptAgent {
    name: String,
    capabilities: Vec<Capability>,
    preamble: &'static str,
    temperature: f32,
    confidence: f64,
    format: ReplyFormat,
    timeout: Duration,
    model: SharedLanguageModel,
}

impl PromptAgent {
    pub fn new(
        name: impl Into<String>,
        preamble: &'static str,
        model: SharedLanguageModel,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            preamble,
            temperature: 0.3,
            confidence: 0.8,
            format: ReplyFormat::Text,
            timeout: DEFAULT_AGENT_TIMEOUT,
            model,
        }
    }

    pub fn capability(mut self, tag: &str, confidence: f64) -> Self {
        self.capabilities.push(Capability::new(tag, confidence));
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Confidence reported on a well-formed reply.
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn format(mut self, format: ReplyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn interpret(&self, reply: String) -> AgentResult {
        match self.format {
            ReplyFormat::Text => AgentResult::success(reply.trim(), self.confidence),
            ReplyFormat::Json => match extract_json_object(&reply)
                .and_then(|json| serde_json::from_str::<Value>(json).ok())
            {
                Some(value) => AgentResult::success(value, self.confidence),
                None => AgentResult::success(reply.trim(), self.confidence * 0.5)
                    .with_metadata("format_error", true),
            },
        }
    }
}

/// Render the user turn, prefixed by the conversation so far.
pub fn render_prompt(task: &Task) -> String {
    if task.message_history.is_empty() {
        return task.input.clone();
    }
    let mut prompt = String::from("Conversation so far:\n");
    for message in &task.message_history {
        let who = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
            MessageRole::System => "System",
        };
        prompt.push_str(&format!("{who}: {}\n", message.content));
    }
    prompt.push_str(&format!("\nCurrent message:\n{}", task.input));
    prompt
}

#[async_trait]
impl Agent for PromptAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn process(&self, task: &Task) -> DispatchResult<AgentResult> {
        let prompt = render_prompt(task);
        let reply = self
            .model
            .generate(self.preamble, &prompt, self.temperature, Some(self.timeout))
            .await?;
        debug!(
            agent = %self.name,
            task = %task.id,
            history = task.message_history.len(),
            "Specialist replied"
        );
        Ok(self
            .interpret(reply)
            .with_metadata("prompt_version", crate::prompts::PROMPT_VERSION))
    }
}

/// Register the four specialists and the router; returns their keys.
pub fn register_all(
    registry: &AgentRegistry,
    model: SharedLanguageModel,
    prompts: Arc<dyn PromptProvider>,
) -> Vec<String> {
    let agents: Vec<Arc<dyn Agent>> = vec![
        Arc::new(specialists::qa_specialist(model.clone())),
        Arc::new(specialists::event_processor(model.clone())),
        Arc::new(specialists::task_orchestrator(model.clone())),
        Arc::new(specialists::general_assistant(model.clone())),
        Arc::new(RouterAgent::new(model, prompts)),
    ];
    agents
        .into_iter()
        .map(|agent| registry.register_agent(agent))
        .collect()
}
