//! Integration tests for registration, classification and selection
//!
//! Registry key derivation, the classifier's cache window in front of a
//! language model, and strategy selection over registered candidates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::config::ClassifierConfig;
use dispatch::router::{ClassificationSource, RoundRobin, WeightedRandom};
use dispatch::{
    normalize_key, Agent, AgentRegistry, AgentResult, Capability, Classifier, Complexity,
    DispatchError, DispatchResult, LanguageModel, MessageType, RoutingTable, SelectionStrategy,
    StaticPromptProvider, Task, TaskContext,
};

struct Named(&'static str);

#[async_trait]
impl Agent for Named {
    fn name(&self) -> &str {
        self.0
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::new("general", 0.5)]
    }

    async fn process(&self, _task: &Task) -> DispatchResult<AgentResult> {
        Ok(AgentResult::success(self.0, 1.0))
    }
}

/// Answers every prompt with a fixed reply and counts calls.
struct CountingModel {
    reply: Result<String, ()>,
    calls: AtomicU32,
}

#[async_trait]
impl LanguageModel for CountingModel {
    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _timeout: Option<Duration>,
    ) -> DispatchResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .map_err(|_| DispatchError::network("model offline"))
    }
}

fn classifier(model: Arc<CountingModel>) -> Classifier {
    Classifier::new(
        ClassifierConfig::default(),
        RoutingTable::default(),
        Arc::new(StaticPromptProvider::new()),
    )
    .with_model(model)
}

/// Test: Display names map to the expected registry keys
#[test]
fn test_registry_keys_from_display_names() {
    let registry = AgentRegistry::new();
    for name in ["Q&A Specialist", "Event Processor", "Task Orchestrator"] {
        registry.register_agent(Arc::new(Named(name)));
    }
    assert_eq!(
        registry.keys(),
        vec!["event-processor", "qa-specialist", "task-orchestrator"]
    );
    assert!(registry.has("Q&A Specialist"));
    assert_eq!(registry.get("qa specialist").unwrap().name, "Q&A Specialist");

    assert_eq!(normalize_key("Event Parser (v2.0)"), "event-parser-v20");
    assert_eq!(normalize_key(""), "");
    assert_eq!(normalize_key("   "), "");
    for name in ["Q&A Specialist", "  Mixed -- Case  ", "a-b c"] {
        let once = normalize_key(name);
        assert_eq!(normalize_key(&once), once);
    }
}

/// Test: Identical input inside the TTL hits the cache; expiry re-invokes the model
#[tokio::test(start_paused = true)]
async fn test_classifier_cache_window() {
    let model = Arc::new(CountingModel {
        reply: Ok(r#"Sure: {"message_type": "question", "confidence": 0.9, "complexity": "medium"}"#.into()),
        calls: AtomicU32::new(0),
    });
    let classifier = classifier(model.clone());
    let ctx = TaskContext::new();

    let (first, source) = classifier.classify_with_source("Lisbon trams", &ctx).await;
    assert_eq!(source, ClassificationSource::Model);
    assert_eq!(first.message_type, MessageType::Question);
    assert_eq!(first.complexity, Complexity::Medium);
    assert_eq!(
        first.suggested_agents,
        vec!["qa-specialist".to_string(), "general-assistant".to_string()]
    );

    let (second, source) = classifier.classify_with_source("Lisbon trams", &ctx).await;
    assert_eq!(source, ClassificationSource::Cache);
    assert_eq!(first, second);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(601)).await;
    let (_, source) = classifier.classify_with_source("Lisbon trams", &ctx).await;
    assert_eq!(source, ClassificationSource::Model);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

/// Test: A dead model degrades to the default classification, which is not cached
#[tokio::test]
async fn test_classifier_defaults_when_model_fails() {
    let model = Arc::new(CountingModel {
        reply: Err(()),
        calls: AtomicU32::new(0),
    });
    let classifier = classifier(model.clone());

    let (result, source) = classifier
        .classify_with_source("Lisbon trams", &TaskContext::new())
        .await;
    assert_eq!(source, ClassificationSource::Default);
    assert_eq!(result.message_type, MessageType::Chat);
    // Structured attempt plus label fallback.
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);

    classifier.classify("Lisbon trams", &TaskContext::new()).await;
    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
}

/// Test: Pattern matches never reach the model
#[tokio::test]
async fn test_patterns_short_circuit_model() {
    let model = Arc::new(CountingModel {
        reply: Err(()),
        calls: AtomicU32::new(0),
    });
    let classifier = classifier(model.clone());

    let result = classifier
        .classify("Remind me to renew my passport", &TaskContext::new())
        .await;
    assert_eq!(result.message_type, MessageType::Event);
    assert!(result.needs_logging);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

/// Test: Round-robin and zero-weight selection over registered candidates
#[tokio::test]
async fn test_strategies_over_registry_candidates() {
    let registry = AgentRegistry::new();
    for name in ["Alpha", "Beta", "Gamma"] {
        registry.register_agent(Arc::new(Named(name)));
    }
    let keys: Vec<String> = vec!["alpha".into(), "beta".into(), "gamma".into(), "missing".into()];
    let candidates = registry.enabled_in_order(&keys);
    assert_eq!(candidates.len(), 3);
    let ctx = TaskContext::new();

    let rr = RoundRobin::new();
    let mut picks = Vec::new();
    for _ in 0..4 {
        picks.push(rr.select(&candidates, &ctx, "x").await.unwrap().key);
    }
    assert_eq!(picks, vec!["alpha", "beta", "gamma", "alpha"]);

    let zero: HashMap<String, u32> = ["Alpha", "beta", "gamma"]
        .into_iter()
        .map(|k| (k.to_string(), 0))
        .collect();
    // All-zero weights fall back to a uniform draw.
    let uniform = WeightedRandom::with_seed(zero, 7);
    assert!(uniform.select(&candidates, &ctx, "x").await.is_some());

    let only_beta = WeightedRandom::with_seed(
        HashMap::from([
            ("alpha".to_string(), 0),
            ("Beta".to_string(), 5),
            ("gamma".to_string(), 0),
        ]),
        7,
    );
    for _ in 0..10 {
        assert_eq!(only_beta.select(&candidates, &ctx, "x").await.unwrap().key, "beta");
    }
    assert!(only_beta.select(&[], &ctx, "x").await.is_none());
}
