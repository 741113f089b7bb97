//! Dispatch Engine
//!
//! Routes a natural-language request to one of several specialised agents and
//! runs it under production-safety guarantees:
//!
//! - **Classification**: cache → regex patterns → language model, with a typed
//!   default when every tier fails
//! - **Selection**: router agent, capability scoring, round-robin or weighted
//!   random over the candidates of the message type
//! - **Execution**: middleware pipeline (validation, rate limiting, result
//!   cache, logging, timing) around a circuit-breaker-gated, retried call
//!   raced against a hard timeout
//! - **Recovery**: one fallback agent, then an aggregated error
//! - **Background work**: bounded priority queue for follow-up agents
//! - **Monitoring**: per-agent statistics, health and threshold alerts
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dispatch::{AgentRegistry, DispatchConfig, Orchestrator, TaskContext};
//!
//! let registry = Arc::new(AgentRegistry::new());
//! registry.register_agent(Arc::new(MyAgent));
//! let orchestrator = Orchestrator::builder(DispatchConfig::from_env())
//!     .registry(registry)
//!     .build()?;
//! let result = orchestrator
//!     .execute(TaskContext::new().user("u1"), "What is a monad?")
//!     .await;
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod middleware;
pub mod monitor;
pub mod orchestrator;
pub mod otel;
pub mod prompts;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod router;
pub mod telemetry;
pub mod types;

pub use agent::{Agent, Capability, SharedAgent};
pub use config::DispatchConfig;
pub use conversation::{ConversationStore, InMemoryConversationStore, SharedConversationStore};
pub use error::{DispatchError, DispatchResult, ErrorKind};
pub use llm::{LanguageModel, SharedLanguageModel};
pub use middleware::{Middleware, MiddlewarePipeline};
pub use monitor::{HealthStatus, PerformanceMonitor};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use prompts::{PromptProvider, StaticPromptProvider};
pub use queue::{QueueStats, TaskQueue};
pub use registry::{normalize_key, AgentDescriptor, AgentRegistry};
pub use retry::{RetryPolicy, RetryStrategy};
pub use router::{Classifier, RoutingTable, SelectionKind, SelectionStrategy};
pub use telemetry::{TelemetryEvent, TelemetrySink};
pub use types::{
    AgentResult, ClassificationResult, Complexity, Message, MessageRole, MessageType,
    OrchestrationResult, RoutingDecision, Task, TaskContext,
};
