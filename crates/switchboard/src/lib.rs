//! Switchboard: the dispatch engine wired to an OpenAI-compatible model.
//!
//! Registers the Q&A specialist, event processor, task orchestrator, general
//! assistant and router, all sharing one [`llm::RigLanguageModel`].

pub mod agents;
pub mod config;
pub mod llm;
pub mod prompts;

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch::{
    AgentRegistry, DispatchConfig, InMemoryConversationStore, Orchestrator, PromptProvider,
    SharedLanguageModel, StaticPromptProvider,
};
use tracing::info;

use crate::config::SwitchboardConfig;
use crate::llm::RigLanguageModel;

/// Assemble an orchestrator around any language model.
///
/// Must be called inside a Tokio runtime (the follow-up queue starts here).
pub fn assemble(engine: DispatchConfig, model: SharedLanguageModel) -> Result<Orchestrator> {
    let prompts: Arc<dyn PromptProvider> =
        Arc::new(StaticPromptProvider::with_overrides(engine.prompts.clone()));
    let registry = Arc::new(AgentRegistry::new());
    let keys = agents::register_all(&registry, model.clone(), prompts.clone());
    info!(agents = ?keys, "Agents registered");

    Orchestrator::builder(engine)
        .registry(registry)
        .model(model)
        .prompts(prompts)
        .conversations(InMemoryConversationStore::new().shared())
        .build()
        .context("Failed to build orchestrator")
}

/// Orchestrator backed by the configured endpoint.
pub fn build_orchestrator(config: &SwitchboardConfig) -> Result<Orchestrator> {
    let engine = config.dispatch_config()?;
    let client = config.build_client()?;
    let model = Arc::new(RigLanguageModel::new(client, config.llm.model.clone()));
    assemble(engine, model)
}
