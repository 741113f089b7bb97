//! Prompt template lookup.
//!
//! Template storage is owned by the embedding application; the engine only
//! asks for a template by key and always gets usable text back.

use std::collections::HashMap;

/// Classifier instruction asking for a structured JSON verdict.
pub const CLASSIFIER_SYSTEM: &str = "classifier.system";
/// Simpler classifier instruction asking for a bare category label.
pub const CLASSIFIER_FALLBACK: &str = "classifier.fallback";
/// Router instruction asking for a JSON routing decision.
pub const ROUTER_SYSTEM: &str = "router.system";

const DEFAULT_CLASSIFIER_SYSTEM: &str = r#"You classify incoming chat messages for a personal assistant.
Categories:
- question: the user asks for information or an explanation
- event: the user mentions something to remember, schedule or be reminded of
- chat: greetings, small talk, acknowledgements
- complex_task: multi-step work such as planning, research or analysis
- irrelevant: spam, gibberish or content the assistant should ignore

Respond with ONLY a JSON object:
{"message_type": "<category>", "confidence": <0.0-1.0>, "complexity": "simple|medium|complex", "needs_logging": <true|false>}"#;

const DEFAULT_CLASSIFIER_FALLBACK: &str = "Reply with exactly one word, the category of the message: \
question, event, chat, complex_task or irrelevant.";

const DEFAULT_ROUTER_SYSTEM: &str = r#"You route a user request to the best agent.
You will receive the request and the list of candidate agent keys.
Respond with ONLY a JSON object:
{"target_agent": "<one candidate key>", "confidence": <0.0-1.0>, "should_parallel": <true|false>, "follow_up_agents": ["<key>", ...]}"#;

const GENERIC_FALLBACK: &str = "You are a helpful assistant. Answer concisely.";

/// Synchronous template lookup with a safe default on missing keys.
pub trait PromptProvider: Send + Sync {
    fn get(&self, template_key: &str) -> String;
}

/// Built-in templates, optionally overridden per key.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptProvider {
    overrides: HashMap<String, String>,
}

impl StaticPromptProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose templates take precedence over the built-in ones.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    pub fn set(&mut self, key: impl Into<String>, template: impl Into<String>) {
        self.overrides.insert(key.into(), template.into());
    }

    fn builtin(key: &str) -> Option<&'static str> {
        match key {
            CLASSIFIER_SYSTEM => Some(DEFAULT_CLASSIFIER_SYSTEM),
            CLASSIFIER_FALLBACK => Some(DEFAULT_CLASSIFIER_FALLBACK),
            ROUTER_SYSTEM => Some(DEFAULT_ROUTER_SYSTEM),
            _ => None,
        }
    }
}

impl PromptProvider for StaticPromptProvider {
    fn get(&self, template_key: &str) -> String {
        if let Some(template) = self.overrides.get(template_key) {
            return template.clone();
        }
        match Self::builtin(template_key) {
            Some(template) => template.to_string(),
            None => {
                tracing::debug!(template_key, "Unknown prompt template, using generic default");
                GENERIC_FALLBACK.to_string()
            }
        }
    }
}
