//! Core data model shared by the classifier, selection, pipeline and
//! orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult, ErrorKind};

/// Closed set of request categories produced by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Event,
    Chat,
    ComplexTask,
    Irrelevant,
}

impl MessageType {
    pub fn all() -> &'static [MessageType] {
        &[
            Self::Question,
            Self::Event,
            Self::Chat,
            Self::ComplexTask,
            Self::Irrelevant,
        ]
    }

    /// Parse a bare label as returned by a model.
    ///
    /// Accepts `complex_task`, `complex-task` and `complex task`, any case,
    /// with surrounding quotes or trailing punctuation.
    pub fn from_label(label: &str) -> Option<Self> {
        let cleaned: String = label
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match cleaned.as_str() {
            "question" => Some(Self::Question),
            "event" => Some(Self::Event),
            "chat" => Some(Self::Chat),
            "complex_task" => Some(Self::ComplexTask),
            "irrelevant" => Some(Self::Irrelevant),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Question => write!(f, "question"),
            Self::Event => write!(f, "event"),
            Self::Chat => write!(f, "chat"),
            Self::ComplexTask => write!(f, "complex_task"),
            Self::Irrelevant => write!(f, "irrelevant"),
        }
    }
}

/// Estimated effort needed to answer a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "medium" => Some(Self::Medium),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Caller-supplied request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub user_id: Option<String>,
    pub channel: Option<String>,
    /// Conversation session, when the caller keeps one.
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a context field by name: the well-known fields first, then
    /// free-form metadata. Empty strings count as missing.
    pub fn field(&self, name: &str) -> Option<String> {
        let known = match name {
            "user_id" | "userId" => self.user_id.clone(),
            "channel" => self.channel.clone(),
            "session_id" | "sessionId" => self.session_id.clone(),
            _ => None,
        };
        known
            .or_else(|| {
                self.metadata.get(name).map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
            .filter(|v| !v.trim().is_empty())
    }

    /// Key used to bucket per-caller state (rate limits).
    pub fn caller_key(&self) -> String {
        match (&self.user_id, &self.channel) {
            (Some(user), Some(channel)) => format!("{channel}:{user}"),
            (Some(user), None) => user.clone(),
            (None, Some(channel)) => format!("{channel}:anonymous"),
            (None, None) => "anonymous".to_string(),
        }
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Unit of work handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Free-form task type; the orchestrator uses the message type label.
    pub task_type: String,
    pub input: String,
    pub context: TaskContext,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_history: Vec<Message>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, input: impl Into<String>, context: TaskContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            input: input.into(),
            context,
            priority: 0,
            created_at: Utc::now(),
            message_history: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.message_history = history;
        self
    }
}

/// Output of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub message_type: MessageType,
    /// Confidence in the classification (0.0–1.0).
    pub confidence: f64,
    pub complexity: Complexity,
    pub needs_logging: bool,
    /// Ordered agent keys suited to this message type.
    #[serde(default)]
    pub suggested_agents: Vec<String>,
}

impl ClassificationResult {
    /// Result used when every classification tier failed.
    pub fn default_chat() -> Self {
        Self {
            message_type: MessageType::Chat,
            confidence: 0.3,
            complexity: Complexity::Simple,
            needs_logging: false,
            suggested_agents: Vec::new(),
        }
    }
}

/// Which agent should handle the request and what else to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target_agent: String,
    pub confidence: f64,
    #[serde(default)]
    pub should_parallel: bool,
    #[serde(default)]
    pub follow_up_agents: Vec<String>,
}

/// What an agent returns. `data` is meaningful on success, `error` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AgentResult {
    pub fn success(data: impl Into<Value>, confidence: f64) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            confidence: 0.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `Ok` on success; otherwise an execution error carrying the agent's
    /// own message.
    pub fn into_result(self) -> DispatchResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(DispatchError::execution(
                self.error.unwrap_or_else(|| "agent reported failure".into()),
            ))
        }
    }

    /// Text rendering of `data` for conversation history and CLI output.
    pub fn data_text(&self) -> Option<String> {
        self.data.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Final outcome of one `Orchestrator::execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub execution_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Human-readable summary, always present.
    pub message: String,
    /// Agents whose output the result is built from.
    pub agents_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    pub confidence: f64,
    pub used_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Follow-up agents queued for background execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queued_follow_ups: Vec<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_labels() {
        assert_eq!(MessageType::from_label("question"), Some(MessageType::Question));
        assert_eq!(MessageType::from_label(" \"EVENT\". "), Some(MessageType::Event));
        assert_eq!(
            MessageType::from_label("complex-task"),
            Some(MessageType::ComplexTask)
        );
        assert_eq!(
            MessageType::from_label("Complex Task"),
            Some(MessageType::ComplexTask)
        );
        assert_eq!(MessageType::from_label("banana"), None);
        for t in MessageType::all() {
            assert_eq!(MessageType::from_label(&t.to_string()), Some(*t));
        }
    }

    #[test]
    fn context_field_lookup() {
        let ctx = TaskContext::new()
            .user("u1")
            .channel("telegram")
            .with_metadata("locale", "de")
            .with_metadata("empty", "");
        assert_eq!(ctx.field("user_id").as_deref(), Some("u1"));
        assert_eq!(ctx.field("userId").as_deref(), Some("u1"));
        assert_eq!(ctx.field("locale").as_deref(), Some("de"));
        assert_eq!(ctx.field("empty"), None);
        assert_eq!(ctx.field("session_id"), None);
        assert_eq!(ctx.caller_key(), "telegram:u1");
        assert_eq!(TaskContext::new().caller_key(), "anonymous");
    }

    #[test]
    fn agent_result_constructors() {
        let ok = AgentResult::success("hi", 1.7);
        assert!(ok.success);
        assert_eq!(ok.confidence, 1.0);
        assert_eq!(ok.data_text().as_deref(), Some("hi"));

        let err = AgentResult::failure("boom");
        assert!(!err.success);
        assert!(err.data.is_none());
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn agent_result_into_result() {
        let ok = AgentResult::success("hi", 0.8).into_result().unwrap();
        assert_eq!(ok.data_text().as_deref(), Some("hi"));

        let err = AgentResult::failure("quota exhausted").into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("quota exhausted"));

        let mut silent = AgentResult::failure("");
        silent.error = None;
        let err = silent.into_result().unwrap_err();
        assert!(err.to_string().contains("agent reported failure"));
    }
}
