//! Integration tests for the assembled switchboard
//!
//! Real specialists and router on top of a scripted language model: routing
//! end to end, structured event replies, router-based selection, session
//! history and total model failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{
    DispatchConfig, DispatchError, DispatchResult, LanguageModel, MessageType, SelectionKind,
    TaskContext,
};
use switchboard::prompts;

/// Answers by recognising which prompt it was given.
struct ScriptedModel {
    router_reply: String,
    offline: bool,
    prompts_seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Self::with_router_reply(r#"{"target_agent": "qa-specialist", "confidence": 0.9}"#)
    }

    fn with_router_reply(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            router_reply: reply.to_string(),
            offline: false,
            prompts_seen: Mutex::new(Vec::new()),
        })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            router_reply: String::new(),
            offline: true,
            prompts_seen: Mutex::new(Vec::new()),
        })
    }

    /// User prompts sent with the given preamble.
    fn user_prompts_for(&self, preamble: &str) -> Vec<String> {
        self.prompts_seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system == preamble)
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _temperature: f32,
        _timeout: Option<Duration>,
    ) -> DispatchResult<String> {
        self.prompts_seen
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        if self.offline {
            return Err(DispatchError::network("connection refused"));
        }
        let reply = if system_prompt == prompts::QA_PREAMBLE {
            format!("Answer to: {}", user_prompt.lines().last().unwrap_or_default())
        } else if system_prompt == prompts::EVENT_PREAMBLE {
            r#"Got it. {"summary": "renew passport", "when": "next month", "action": "remind", "reply": "I'll remind you."}"#
                .to_string()
        } else if system_prompt == prompts::GENERAL_PREAMBLE {
            "Happy to help.".to_string()
        } else if system_prompt.contains("target_agent") {
            self.router_reply.clone()
        } else if system_prompt.contains("message_type") {
            r#"{"message_type": "question", "confidence": 0.9, "complexity": "simple"}"#.to_string()
        } else {
            "question".to_string()
        };
        Ok(reply)
    }
}

fn ctx() -> TaskContext {
    TaskContext::new().user("u1").channel("cli")
}

/// Test: All five agents register under their routing keys
#[tokio::test]
async fn test_assemble_registers_all_agents() {
    let orch = switchboard::assemble(DispatchConfig::default(), ScriptedModel::new()).unwrap();
    assert_eq!(
        orch.registry().keys(),
        vec![
            "event-processor",
            "general-assistant",
            "qa-specialist",
            "router",
            "task-orchestrator"
        ]
    );
    orch.shutdown().await;
}

/// Test: A question is answered by the Q&A specialist through the model
#[tokio::test]
async fn test_question_answered_by_specialist() {
    let model = ScriptedModel::new();
    let orch = switchboard::assemble(DispatchConfig::default(), model.clone()).unwrap();

    let result = orch.execute(ctx(), "What is a borrow checker?").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.agents_used, vec!["qa-specialist".to_string()]);
    assert_eq!(result.message, "Answer to: What is a borrow checker?");
    assert_eq!(
        result.classification.as_ref().unwrap().message_type,
        MessageType::Question
    );
    assert_eq!(model.user_prompts_for(prompts::QA_PREAMBLE).len(), 1);
    orch.shutdown().await;
}

/// Test: Reminders reach the event processor and come back as structured data
#[tokio::test]
async fn test_event_reply_is_structured() {
    let orch = switchboard::assemble(DispatchConfig::default(), ScriptedModel::new()).unwrap();

    let result = orch
        .execute(ctx(), "Remind me to renew my passport next month")
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.agents_used, vec!["event-processor".to_string()]);
    let data = result.response.unwrap();
    assert_eq!(data["action"], "remind");
    assert_eq!(data["when"], "next month");
    orch.shutdown().await;
}

/// Test: Router-based selection follows the router agent's decision
#[tokio::test]
async fn test_router_selection_uses_router_agent() {
    let model = ScriptedModel::with_router_reply(
        r#"```json
{"target_agent": "General Assistant", "confidence": 0.7}
```"#,
    );
    let mut config = DispatchConfig::default();
    config.orchestrator.selection = SelectionKind::Router;
    let orch = switchboard::assemble(config, model.clone()).unwrap();

    let result = orch.execute(ctx(), "What is a borrow checker?").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.agents_used, vec!["general-assistant".to_string()]);
    assert_eq!(result.message, "Happy to help.");
    assert_eq!(result.routing.as_ref().unwrap().target_agent, "general-assistant");
    let routed: Vec<_> = model
        .prompts_seen
        .lock()
        .unwrap()
        .iter()
        .filter(|(system, _)| system.contains("target_agent"))
        .map(|(_, user)| user.clone())
        .collect();
    assert_eq!(routed.len(), 1);
    assert!(routed[0].contains("Candidates: qa-specialist, general-assistant"));
    orch.shutdown().await;
}

/// Test: A session's earlier turns are rendered into the specialist prompt
#[tokio::test]
async fn test_session_history_reaches_prompt() {
    let model = ScriptedModel::new();
    let orch = switchboard::assemble(DispatchConfig::default(), model.clone()).unwrap();
    let session = ctx().session("s-42");

    let first = orch.execute(session.clone(), "What is a borrow checker?").await;
    assert!(first.success);
    let second = orch.execute(session, "Why does it reject my code?").await;
    assert!(second.success);

    let qa_prompts = model.user_prompts_for(prompts::QA_PREAMBLE);
    assert_eq!(qa_prompts.len(), 2);
    assert_eq!(qa_prompts[0], "What is a borrow checker?");
    assert!(qa_prompts[1].contains("User: What is a borrow checker?"));
    assert!(qa_prompts[1].contains("Assistant: Answer to: What is a borrow checker?"));
    assert!(qa_prompts[1].ends_with("Current message:\nWhy does it reject my code?"));
    orch.shutdown().await;
}

/// Test: With the model offline both primary and fallback fail cleanly
#[tokio::test]
async fn test_model_offline_reports_failure() {
    let mut config = DispatchConfig::default();
    config.retry.max_retries = 0;
    let orch = switchboard::assemble(config, ScriptedModel::offline()).unwrap();

    let result = orch.execute(ctx(), "What is a borrow checker?").await;

    assert!(!result.success);
    assert!(result.agents_used.is_empty());
    assert!(result.message.starts_with("Request could not be completed"));
    assert_eq!(result.metadata["error_kind"], "network");
    orch.shutdown().await;
}
