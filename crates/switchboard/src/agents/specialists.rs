//! The four user-facing specialists.
//!
//! Display names are part of the routing contract: the registry derives the
//! keys the routing table refers to (`qa-specialist`, `event-processor`,
//! `task-orchestrator`, `general-assistant`) from them.

use dispatch::SharedLanguageModel;

use super::{PromptAgent, ReplyFormat};
use crate::prompts;

/// Factual questions and explanations.
pub fn qa_specialist(model: SharedLanguageModel) -> PromptAgent {
    PromptAgent::new("Q&A Specialist", prompts::QA_PREAMBLE, model)
        .capability("question-answering", 0.9)
        .capability("research", 0.7)
        .temperature(0.2)
        .confidence(0.85)
}

/// Reminders, appointments and notes; replies with structured JSON.
pub fn event_processor(model: SharedLanguageModel) -> PromptAgent {
    PromptAgent::new("Event Processor", prompts::EVENT_PREAMBLE, model)
        .capability("scheduling", 0.9)
        .capability("reminders", 0.9)
        .temperature(0.1)
        .format(ReplyFormat::Json)
}

/// Multi-step planning, research and analysis.
pub fn task_orchestrator(model: SharedLanguageModel) -> PromptAgent {
    PromptAgent::new("Task Orchestrator", prompts::TASK_PREAMBLE, model)
        .capability("planning", 0.9)
        .capability("analysis", 0.8)
        .capability("research", 0.6)
        .temperature(0.4)
}

/// Small talk and the default fallback target.
pub fn general_assistant(model: SharedLanguageModel) -> PromptAgent {
    PromptAgent::new("General Assistant", prompts::GENERAL_PREAMBLE, model)
        .capability("conversation", 0.8)
        .capability("general", 0.6)
        .temperature(0.6)
        .confidence(0.6)
}
