//! Three-tier request classifier.
//!
//! Resolution order, first hit wins:
//! 1. result cache keyed by a hash of the input text
//! 2. the fixed [pattern table](super::patterns)
//! 3. the language model (structured JSON verdict, then a bare-label retry)
//!
//! When every tier fails the result is `chat` at 0.3 confidence. That
//! default is never cached, so a recovered model gets another chance.
//! Model output is untrusted text and never causes an error to escape.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{hash_key, CacheStats, TtlCache};
use crate::config::ClassifierConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::llm::{extract_json_object, SharedLanguageModel};
use crate::prompts::{PromptProvider, CLASSIFIER_FALLBACK, CLASSIFIER_SYSTEM};
use crate::router::patterns::match_pattern;
use crate::router::RoutingTable;
use crate::types::{ClassificationResult, Complexity, MessageType, TaskContext};

/// Which tier produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Cache,
    Pattern,
    Model,
    FallbackLabel,
    Default,
}

impl std::fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Pattern => write!(f, "pattern"),
            Self::Model => write!(f, "model"),
            Self::FallbackLabel => write!(f, "fallback_label"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Raw shape the classification prompt asks for.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    #[serde(alias = "messageType", alias = "type")]
    message_type: String,
    confidence: f64,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default, alias = "needsLogging")]
    needs_logging: Option<bool>,
}

/// Strictly decode a model's classification verdict.
///
/// The first balanced JSON object in `text` must carry a known message type
/// and a confidence within [0, 1]; complexity, when present, must be known.
pub fn parse_verdict(text: &str) -> DispatchResult<ClassificationResult> {
    let json = extract_json_object(text)
        .ok_or_else(|| DispatchError::parsing("no JSON object in classifier output"))?;
    let verdict: ModelVerdict = serde_json::from_str(json)?;

    let message_type = MessageType::from_label(&verdict.message_type).ok_or_else(|| {
        DispatchError::parsing(format!("unknown message type '{}'", verdict.message_type))
    })?;
    if !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(DispatchError::parsing(format!(
            "confidence {} outside [0, 1]",
            verdict.confidence
        )));
    }
    let complexity = match verdict.complexity.as_deref() {
        Some(label) => Complexity::from_label(label)
            .ok_or_else(|| DispatchError::parsing(format!("unknown complexity '{label}'")))?,
        None => default_complexity(message_type),
    };

    Ok(ClassificationResult {
        message_type,
        confidence: verdict.confidence,
        complexity,
        needs_logging: verdict
            .needs_logging
            .unwrap_or(message_type == MessageType::Event),
        suggested_agents: Vec::new(),
    })
}

fn default_complexity(message_type: MessageType) -> Complexity {
    if message_type == MessageType::ComplexTask {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

fn from_type(message_type: MessageType, confidence: f64) -> ClassificationResult {
    ClassificationResult {
        message_type,
        confidence,
        complexity: default_complexity(message_type),
        needs_logging: message_type == MessageType::Event,
        suggested_agents: Vec::new(),
    }
}

/// Cache → pattern → model classifier.
pub struct Classifier {
    config: ClassifierConfig,
    routes: RoutingTable,
    prompts: Arc<dyn PromptProvider>,
    model: Option<SharedLanguageModel>,
    cache: TtlCache<ClassificationResult>,
}

impl Classifier {
    pub fn new(
        config: ClassifierConfig,
        routes: RoutingTable,
        prompts: Arc<dyn PromptProvider>,
    ) -> Self {
        let cache = TtlCache::new(config.cache_ttl(), config.cache_max_entries);
        Self {
            config,
            routes,
            prompts,
            model: None,
            cache,
        }
    }

    /// Enable the model-backed tier.
    pub fn with_model(mut self, model: SharedLanguageModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub async fn classify(&self, input: &str, context: &TaskContext) -> ClassificationResult {
        self.classify_with_source(input, context).await.0
    }

    /// Classification plus the tier that produced it.
    pub async fn classify_with_source(
        &self,
        input: &str,
        context: &TaskContext,
    ) -> (ClassificationResult, ClassificationSource) {
        let key = hash_key(&[input]);
        if let Some(hit) = self.cache.get(&key) {
            debug!(message_type = %hit.message_type, "Classification cache hit");
            return (hit, ClassificationSource::Cache);
        }

        let (mut result, source) = match match_pattern(input) {
            Some(message_type) => (
                from_type(message_type, self.config.pattern_confidence),
                ClassificationSource::Pattern,
            ),
            None => self.classify_with_model(input, context).await,
        };
        result.suggested_agents = self.routes.candidates(result.message_type).to_vec();

        if source != ClassificationSource::Default {
            self.cache.insert(key, result.clone());
        }
        debug!(
            message_type = %result.message_type,
            confidence = result.confidence,
            %source,
            "Classified input"
        );
        (result, source)
    }

    async fn classify_with_model(
        &self,
        input: &str,
        context: &TaskContext,
    ) -> (ClassificationResult, ClassificationSource) {
        let Some(model) = &self.model else {
            return (ClassificationResult::default_chat(), ClassificationSource::Default);
        };
        let timeout = Some(self.config.model_timeout());
        let user_prompt = match context.channel.as_deref() {
            Some(channel) => format!("Channel: {channel}\nMessage: {input}"),
            None => input.to_string(),
        };

        let system = self.prompts.get(CLASSIFIER_SYSTEM);
        match model
            .generate(&system, &user_prompt, self.config.temperature, timeout)
            .await
            .and_then(|text| parse_verdict(&text))
        {
            Ok(result) => return (result, ClassificationSource::Model),
            Err(e) => warn!(error = %e, "Structured classification failed, trying label fallback"),
        }

        let fallback = self.prompts.get(CLASSIFIER_FALLBACK);
        match model.generate(&fallback, input, 0.0, timeout).await {
            Ok(text) => match MessageType::from_label(&text) {
                Some(message_type) => {
                    return (
                        from_type(message_type, self.config.fallback_confidence),
                        ClassificationSource::FallbackLabel,
                    )
                }
                None => warn!(label = %text.trim(), "Fallback classifier returned unknown label"),
            },
            Err(e) => warn!(error = %e, "Fallback classification failed"),
        }

        (ClassificationResult::default_chat(), ClassificationSource::Default)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
