//! Handler selection strategies.
//!
//! Every strategy picks one descriptor out of the candidate list and returns
//! `None` (never an error) when the list is empty. [`SelectionStrategy::decide`]
//! wraps the pick into a full [`RoutingDecision`]; the router-based strategy
//! overrides it to surface the router agent's own decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::llm::extract_json_object;
use crate::registry::{normalize_key, AgentDescriptor, AgentRegistry};
use crate::types::{ClassificationResult, Complexity, RoutingDecision, Task, TaskContext};

/// Capability tag every general-purpose agent advertises.
pub const GENERAL_CAPABILITY: &str = "general";

/// Configured strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Router,
    #[default]
    Capability,
    RoundRobin,
    WeightedRandom,
}

impl std::fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Router => write!(f, "router"),
            Self::Capability => write!(f, "capability"),
            Self::RoundRobin => write!(f, "round_robin"),
            Self::WeightedRandom => write!(f, "weighted_random"),
        }
    }
}

impl std::str::FromStr for SelectionKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "router" | "router_based" => Ok(Self::Router),
            "capability" | "capability_based" => Ok(Self::Capability),
            "round_robin" => Ok(Self::RoundRobin),
            "weighted_random" | "weighted" => Ok(Self::WeightedRandom),
            other => Err(DispatchError::configuration(format!(
                "unknown selection strategy '{other}'"
            ))),
        }
    }
}

/// Decision shape derived from a plain pick: complex requests fan out to the
/// remaining candidates.
fn decision_for(
    chosen: &AgentDescriptor,
    candidates: &[AgentDescriptor],
    classification: &ClassificationResult,
) -> RoutingDecision {
    let follow_up_agents: Vec<String> = if classification.complexity == Complexity::Complex {
        candidates
            .iter()
            .filter(|d| d.key != chosen.key)
            .map(|d| d.key.clone())
            .collect()
    } else {
        Vec::new()
    };
    RoutingDecision {
        target_agent: chosen.key.clone(),
        confidence: classification.confidence,
        should_parallel: !follow_up_agents.is_empty(),
        follow_up_agents,
    }
}

#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn kind(&self) -> SelectionKind;

    /// Pick one of `candidates`; `None` iff the list is empty.
    async fn select(
        &self,
        candidates: &[AgentDescriptor],
        context: &TaskContext,
        input: &str,
    ) -> Option<AgentDescriptor>;

    /// Full routing decision for a classified request.
    async fn decide(
        &self,
        candidates: &[AgentDescriptor],
        context: &TaskContext,
        input: &str,
        classification: &ClassificationResult,
    ) -> Option<RoutingDecision> {
        let chosen = self.select(candidates, context, input).await?;
        Some(decision_for(&chosen, candidates, classification))
    }
}

/// Router agent's answer, accepting snake_case or camelCase keys.
#[derive(Debug, Deserialize)]
struct RouterReply {
    #[serde(alias = "targetAgent", alias = "agent")]
    target_agent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "shouldParallel")]
    should_parallel: bool,
    #[serde(default, alias = "followUpAgents")]
    follow_up_agents: Vec<String>,
}

/// Decode a router agent's output (JSON value or text containing JSON).
pub fn parse_router_reply(data: &Value) -> DispatchResult<RoutingDecision> {
    let reply: RouterReply = match data {
        Value::String(text) => {
            let json = extract_json_object(text)
                .ok_or_else(|| DispatchError::parsing("no JSON object in router output"))?;
            serde_json::from_str(json)?
        }
        other => serde_json::from_value(other.clone())?,
    };
    let confidence = reply.confidence.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(DispatchError::parsing(format!(
            "router confidence {confidence} outside [0, 1]"
        )));
    }
    Ok(RoutingDecision {
        target_agent: normalize_key(&reply.target_agent),
        confidence,
        should_parallel: reply.should_parallel,
        follow_up_agents: reply
            .follow_up_agents
            .iter()
            .map(|k| normalize_key(k))
            .filter(|k| !k.is_empty())
            .collect(),
    })
}

/// Delegates to a designated router agent; the first candidate on failure.
pub struct RouterBased {
    registry: Arc<AgentRegistry>,
    router_key: String,
    timeout: Duration,
}

impl RouterBased {
    pub fn new(registry: Arc<AgentRegistry>, router_key: impl Into<String>) -> Self {
        Self {
            registry,
            router_key: normalize_key(&router_key.into()),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ask_router(
        &self,
        candidates: &[AgentDescriptor],
        context: &TaskContext,
        input: &str,
        classification: Option<&ClassificationResult>,
    ) -> DispatchResult<RoutingDecision> {
        let router = self.registry.get(&self.router_key).ok_or_else(|| {
            DispatchError::configuration(format!("router agent '{}' not registered", self.router_key))
        })?;
        let keys: Vec<Value> = candidates.iter().map(|d| Value::from(d.key.clone())).collect();
        let mut ctx = context.clone().with_metadata("candidates", Value::Array(keys));
        if let Some(c) = classification {
            ctx = ctx
                .with_metadata("message_type", c.message_type.to_string())
                .with_metadata("complexity", c.complexity.to_string());
        }
        let task = Task::new("route", input, ctx);

        let result = tokio::time::timeout(self.timeout, router.agent().process(&task))
            .await
            .map_err(|_| DispatchError::timeout(self.timeout))??;
        if !result.success {
            return Err(DispatchError::execution(
                result.error.unwrap_or_else(|| "router failed".to_string()),
            ));
        }
        let data = result
            .data
            .ok_or_else(|| DispatchError::parsing("router returned no data"))?;
        parse_router_reply(&data)
    }
}

#[async_trait]
impl SelectionStrategy for RouterBased {
    fn kind(&self) -> SelectionKind {
        SelectionKind::Router
    }

    async fn select(
        &self,
        candidates: &[AgentDescriptor],
        context: &TaskContext,
        input: &str,
    ) -> Option<AgentDescriptor> {
        let first = candidates.first()?;
        match self.ask_router(candidates, context, input, None).await {
            Ok(decision) => candidates
                .iter()
                .find(|d| d.key == decision.target_agent)
                .or(Some(first))
                .cloned(),
            Err(e) => {
                warn!(error = %e, fallback = %first.key, "Router failed, using first candidate");
                Some(first.clone())
            }
        }
    }

    /// The router's decision is returned unvalidated; the orchestrator
    /// corrects a target outside the candidate set.
    async fn decide(
        &self,
        candidates: &[AgentDescriptor],
        context: &TaskContext,
        input: &str,
        classification: &ClassificationResult,
    ) -> Option<RoutingDecision> {
        let first = candidates.first()?;
        match self
            .ask_router(candidates, context, input, Some(classification))
            .await
        {
            Ok(decision) => Some(decision),
            Err(e) => {
                warn!(error = %e, fallback = %first.key, "Router failed, using first candidate");
                Some(decision_for(first, candidates, classification))
            }
        }
    }
}

/// Keyword → capability tag table.
const KEYWORD_TAGS: &[(&str, &[&str])] = &[
    (
        "question-answering",
        &["what", "why", "how", "who", "where", "which", "explain", "define", "meaning"],
    ),
    (
        "scheduling",
        &["schedule", "meeting", "appointment", "calendar", "tomorrow", "tonight", "deadline"],
    ),
    ("reminders", &["remind", "reminder", "forget", "remember"]),
    ("planning", &["plan", "steps", "roadmap", "organize", "organise", "itinerary"]),
    ("research", &["research", "compare", "sources", "investigate"]),
    ("analysis", &["analyze", "analyse", "analysis", "evaluate", "pros", "cons"]),
    ("conversation", &["hi", "hello", "hey", "thanks", "thank", "chat"]),
];

/// Capability tags implied by keywords in `input`.
pub fn required_tags(input: &str) -> Vec<&'static str> {
    let lower = input.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mut tags: Vec<&'static str> = KEYWORD_TAGS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map(|(tag, _)| *tag)
        .collect();
    if lower.trim_end().ends_with('?') && !tags.contains(&"question-answering") {
        tags.push("question-answering");
    }
    tags
}

/// Scores candidates by matching capability tags.
#[derive(Debug, Default)]
pub struct CapabilityBased;

impl CapabilityBased {
    /// Matching tag count plus 0.1 for the general tag.
    pub fn score(descriptor: &AgentDescriptor, tags: &[&str]) -> f64 {
        let matches = tags.iter().filter(|t| descriptor.has_capability(t)).count() as f64;
        let bonus = if descriptor.has_capability(GENERAL_CAPABILITY) {
            0.1
        } else {
            0.0
        };
        matches + bonus
    }
}

#[async_trait]
impl SelectionStrategy for CapabilityBased {
    fn kind(&self) -> SelectionKind {
        SelectionKind::Capability
    }

    async fn select(
        &self,
        candidates: &[AgentDescriptor],
        _context: &TaskContext,
        input: &str,
    ) -> Option<AgentDescriptor> {
        let tags = required_tags(input);
        let mut best: Option<(&AgentDescriptor, f64)> = None;
        for candidate in candidates {
            let score = Self::score(candidate, &tags);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        best.map(|(d, score)| {
            debug!(agent = %d.key, score, ?tags, "Capability selection");
            d.clone()
        })
    }
}

/// Cycles through candidates.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobin {
    fn kind(&self) -> SelectionKind {
        SelectionKind::RoundRobin
    }

    async fn select(
        &self,
        candidates: &[AgentDescriptor],
        _context: &TaskContext,
        _input: &str,
    ) -> Option<AgentDescriptor> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index).cloned()
    }
}

/// Single weighted draw; unlisted keys weigh 1.
#[derive(Debug)]
pub struct WeightedRandom {
    weights: HashMap<String, u32>,
    rng: Mutex<StdRng>,
}

impl WeightedRandom {
    pub fn new(weights: HashMap<String, u32>) -> Self {
        Self {
            weights: normalize_weights(weights),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic draws, for tests.
    pub fn with_seed(weights: HashMap<String, u32>, seed: u64) -> Self {
        Self {
            weights: normalize_weights(weights),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn weight(&self, key: &str) -> u32 {
        self.weights.get(key).copied().unwrap_or(1)
    }
}

fn normalize_weights(weights: HashMap<String, u32>) -> HashMap<String, u32> {
    weights
        .into_iter()
        .map(|(k, w)| (normalize_key(&k), w))
        .collect()
}

#[async_trait]
impl SelectionStrategy for WeightedRandom {
    fn kind(&self) -> SelectionKind {
        SelectionKind::WeightedRandom
    }

    async fn select(
        &self,
        candidates: &[AgentDescriptor],
        _context: &TaskContext,
        _input: &str,
    ) -> Option<AgentDescriptor> {
        if candidates.is_empty() {
            return None;
        }
        let weights: Vec<u32> = candidates.iter().map(|d| self.weight(&d.key)).collect();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let index = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(&mut *rng),
            // Every weight zero: uniform draw.
            Err(_) => rng.gen_range(0..candidates.len()),
        };
        candidates.get(index).cloned()
    }
}
