//! Request orchestration.
//!
//! One [`Orchestrator::execute`] call runs, strictly in order:
//!
//! 1. classification (cache → pattern → model),
//! 2. candidate lookup from the routing table and target selection,
//! 3. the target through the middleware pipeline, gated by its circuit
//!    breaker and retried per the retry policy, all raced against the hard
//!    execution timeout,
//! 4. on success, follow-up agents onto the task queue when the decision asks
//!    for parallel work on a complex request,
//! 5. on terminal failure, the fallback agent once without retries.
//!
//! When both the target and the fallback fail, [`Orchestrator::try_execute`]
//! returns one aggregated error; [`Orchestrator::execute`] folds it into a
//! failed [`OrchestrationResult`] carrying the error kind in its metadata.
//!
//! The hard timeout abandons the pending future. Dropping it cancels work at
//! its next suspension point; a request already handed to an external
//! service may still complete unobserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{DispatchConfig, OrchestratorConfig};
use crate::conversation::SharedConversationStore;
use crate::error::{DispatchError, DispatchResult, ErrorKind};
use crate::llm::SharedLanguageModel;
use crate::middleware::{Invocation, MiddlewarePipeline};
use crate::monitor::{ExecutionMetric, HealthReport, PerformanceMonitor};
use crate::otel;
use crate::prompts::{PromptProvider, StaticPromptProvider};
use crate::queue::{CompletionHook, QueueOutcome, TaskQueue};
use crate::registry::{normalize_key, AgentDescriptor, AgentRegistry};
use crate::retry::RetryPolicy;
use crate::router::{
    CapabilityBased, CircuitBreakerRegistry, Classifier, RoundRobin, RouterBased, SelectionKind,
    SelectionStrategy, WeightedRandom,
};
use crate::telemetry::{SharedTelemetrySink, TelemetryEvent, TracingTelemetrySink};
use crate::types::{
    AgentResult, ClassificationResult, Complexity, Message, OrchestrationResult, RoutingDecision,
    Task, TaskContext,
};

/// What is known about a request by the time it finishes or fails.
#[derive(Default)]
struct Trail {
    classification: Option<ClassificationResult>,
    routing: Option<RoutingDecision>,
    attempted: Vec<String>,
    used_fallback: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    classifier: Classifier,
    strategy: Arc<dyn SelectionStrategy>,
    pipeline: MiddlewarePipeline,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    queue: Arc<TaskQueue>,
    monitor: Arc<PerformanceMonitor>,
    telemetry: SharedTelemetrySink,
    conversations: Option<SharedConversationStore>,
}

impl Orchestrator {
    pub fn builder(config: DispatchConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn selection(&self) -> SelectionKind {
        self.strategy.kind()
    }

    pub fn health(&self) -> HealthReport {
        self.monitor.health()
    }

    /// Route and run one request. Never fails; total failure is reported in
    /// the returned result.
    pub async fn execute(&self, context: TaskContext, input: &str) -> OrchestrationResult {
        let (execution_id, started, trail, outcome) = self.execute_traced(context, input).await;
        match outcome {
            Ok(result) => result,
            Err(err) => failure_result(execution_id, started, trail, &err),
        }
    }

    /// Like [`Orchestrator::execute`], but returns the aggregated error when
    /// both the target and the fallback failed.
    pub async fn try_execute(
        &self,
        context: TaskContext,
        input: &str,
    ) -> DispatchResult<OrchestrationResult> {
        self.execute_traced(context, input).await.3
    }

    /// Stop the follow-up queue, waiting for tasks already running.
    pub async fn shutdown(&self) {
        let discarded = self.queue.close().await;
        info!(discarded, "Orchestrator shut down");
    }

    async fn execute_traced(
        &self,
        context: TaskContext,
        input: &str,
    ) -> (Uuid, Instant, Trail, DispatchResult<OrchestrationResult>) {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let span = otel::execute_span(&execution_id.to_string());
        let mut trail = Trail::default();

        let outcome = self
            .run(execution_id, started, context, input, &mut trail)
            .instrument(span.clone())
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut event = TelemetryEvent::new(execution_id.to_string())
            .with("duration_ms", duration_ms)
            .with("used_fallback", trail.used_fallback);
        if let Some(c) = &trail.classification {
            event = event.with("message_type", c.message_type.to_string());
        }
        match &outcome {
            Ok(result) => {
                let agent = result.agents_used.first().map_or("", String::as_str);
                otel::record_execute_result(
                    &span,
                    agent,
                    true,
                    result.used_fallback,
                    result.confidence,
                    duration_ms,
                );
                event = event
                    .with("success", true)
                    .with("agent", agent)
                    .with("confidence", result.confidence);
            }
            Err(err) => {
                otel::record_execute_result(&span, "", false, trail.used_fallback, 0.0, duration_ms);
                warn!(execution = %execution_id, kind = %err.kind(), "Execution failed: {err}");
                event = event
                    .with("success", false)
                    .with("error_kind", err.kind().to_string());
            }
        }
        self.telemetry.emit(event);

        (execution_id, started, trail, outcome)
    }

    async fn run(
        &self,
        execution_id: Uuid,
        started: Instant,
        context: TaskContext,
        input: &str,
        trail: &mut Trail,
    ) -> DispatchResult<OrchestrationResult> {
        let exec = execution_id.to_string();

        let classify_span = otel::classify_span(&exec);
        let (classification, source) = self
            .classifier
            .classify_with_source(input, &context)
            .instrument(classify_span.clone())
            .await;
        otel::record_classification(
            &classify_span,
            &classification.message_type.to_string(),
            &source.to_string(),
            classification.confidence,
        );
        trail.classification = Some(classification.clone());
        if classification.needs_logging {
            info!(execution = %exec, message_type = %classification.message_type, "Request flagged for logging");
        }

        let candidates = self
            .registry
            .enabled_in_order(self.classifier.routes().candidates(classification.message_type));
        let decision = self
            .strategy
            .decide(&candidates, &context, input, &classification)
            .await
            .map(|d| self.validate_decision(d, &candidates));
        trail.routing = decision.clone();

        let history = self.load_history(&context).await;
        let task = Task::new(classification.message_type.to_string(), input, context.clone())
            .with_history(history);

        let target = decision
            .as_ref()
            .and_then(|d| candidates.iter().find(|c| c.key == d.target_agent));
        let primary_key = match &decision {
            Some(d) => d.target_agent.clone(),
            None => "none".to_string(),
        };

        let primary_error = match target {
            Some(descriptor) => {
                trail.attempted.push(descriptor.key.clone());
                let span = otel::agent_span(&exec, &descriptor.key);
                let outcome = self
                    .invoke(
                        execution_id,
                        descriptor,
                        task.clone(),
                        &self.retry,
                        Some(self.config.execution_timeout()),
                        false,
                    )
                    .instrument(span)
                    .await;
                match outcome {
                    Ok(result) => {
                        let queued = match &decision {
                            Some(d) => self.enqueue_follow_ups(d, &classification, &task),
                            None => Vec::new(),
                        };
                        self.remember(&context, input, &result).await;
                        return Ok(self.success_result(
                            execution_id,
                            started,
                            &descriptor.key,
                            result,
                            trail,
                            queued,
                            source.to_string(),
                        ));
                    }
                    Err(err) => err,
                }
            }
            None => {
                let err = DispatchError::configuration(format!(
                    "no enabled agent for message type '{}'",
                    classification.message_type
                ));
                self.record_unreachable(execution_id, &primary_key, &err);
                err
            }
        };

        let fallback_key = normalize_key(&self.config.fallback_agent);
        warn!(
            execution = %exec,
            primary = %primary_key,
            fallback = %fallback_key,
            kind = %primary_error.kind(),
            "Primary agent failed, invoking fallback: {primary_error}"
        );
        trail.used_fallback = true;
        trail.attempted.push(fallback_key.clone());
        // The request already holds a rate-limit slot if its primary ran.
        let charged = target.is_some() && primary_error.kind() != ErrorKind::RateLimit;

        let fallback_outcome = match self.registry.get(&fallback_key).filter(|d| d.enabled) {
            Some(descriptor) => {
                let span = otel::fallback_span(&exec, &fallback_key, &primary_key);
                self.invoke(execution_id, &descriptor, task, &RetryPolicy::none(), None, charged)
                    .instrument(span)
                    .await
            }
            None => {
                let err = DispatchError::configuration(format!(
                    "fallback agent '{fallback_key}' is not registered"
                ));
                self.record_unreachable(execution_id, &fallback_key, &err);
                Err(err)
            }
        };

        match fallback_outcome {
            Ok(result) => {
                self.remember(&context, input, &result).await;
                let mut outcome = self.success_result(
                    execution_id,
                    started,
                    &fallback_key,
                    result,
                    trail,
                    Vec::new(),
                    source.to_string(),
                );
                outcome
                    .metadata
                    .insert("primary_agent".into(), Value::from(primary_key));
                outcome
                    .metadata
                    .insert("primary_error".into(), Value::from(primary_error.to_string()));
                outcome.metadata.insert(
                    "primary_error_kind".into(),
                    Value::from(primary_error.kind().to_string()),
                );
                Ok(outcome)
            }
            Err(fallback_error) => Err(DispatchError::exhausted(
                &primary_key,
                primary_error,
                &fallback_key,
                fallback_error,
            )),
        }
    }

    /// Keep the target inside the candidate set and drop self-references
    /// from the follow-ups.
    fn validate_decision(
        &self,
        mut decision: RoutingDecision,
        candidates: &[AgentDescriptor],
    ) -> RoutingDecision {
        if let Some(first) = candidates.first() {
            if !candidates.iter().any(|c| c.key == decision.target_agent) {
                warn!(
                    target = %decision.target_agent,
                    corrected = %first.key,
                    "Routing target outside candidate set"
                );
                decision.target_agent = first.key.clone();
                decision.confidence =
                    (decision.confidence * self.config.invalid_target_penalty).clamp(0.0, 1.0);
            }
        }
        let mut seen = Vec::new();
        decision.follow_up_agents.retain(|key| {
            let keep = *key != decision.target_agent && !seen.contains(key);
            seen.push(key.clone());
            keep
        });
        decision.should_parallel = decision.should_parallel && !decision.follow_up_agents.is_empty();
        decision
    }

    /// Run one handler through the pipeline and record its metric.
    async fn invoke(
        &self,
        execution_id: Uuid,
        descriptor: &AgentDescriptor,
        task: Task,
        retry: &RetryPolicy,
        deadline: Option<Duration>,
        already_admitted: bool,
    ) -> DispatchResult<AgentResult> {
        let key = descriptor.key.as_str();
        let agent = descriptor.agent();
        let breakers = self.breakers.as_ref();
        let agent_timeout = self.config.agent_timeout();
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let started = Instant::now();

        let terminal = move |task: Task| async move {
            if !agent.can_handle(&task).await {
                return Err(DispatchError::execution(format!(
                    "agent '{key}' cannot handle this task"
                )));
            }
            let task = &task;
            let outcome = retry
                .run(move |attempt| async move {
                    attempts_ref.fetch_add(1, Ordering::SeqCst);
                    if !breakers.can_execute(key) {
                        return Err(DispatchError::circuit_open(key));
                    }
                    let result = match tokio::time::timeout(agent_timeout, agent.process(task)).await
                    {
                        Ok(result) => result.and_then(AgentResult::into_result),
                        Err(_) => Err(DispatchError::timeout(agent_timeout)),
                    };
                    match &result {
                        Ok(_) => breakers.record_success(key),
                        Err(err) => {
                            debug!(agent = %key, attempt, kind = %err.kind(), "Attempt failed");
                            breakers.record_failure(key);
                        }
                    }
                    result
                })
                .await;
            outcome.result
        };

        let mut invocation = Invocation::new(key, task);
        if already_admitted {
            invocation = invocation.as_fallback();
        }
        let run = self.pipeline.run(invocation, terminal);
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or_else(|_| Err(DispatchError::timeout(limit))),
            None => run.await,
        }
        .and_then(AgentResult::into_result);

        let attempts = attempts.load(Ordering::SeqCst);
        let elapsed = started.elapsed();
        let mut metric = ExecutionMetric::start(key, execution_id)
            .finish(result.is_ok(), elapsed)
            .with_retries(attempts.saturating_sub(1));
        metric = match &result {
            Ok(r) => metric.with_confidence(r.confidence),
            Err(e) => metric.with_error(e.kind()),
        };
        self.monitor.record(metric);

        let span = Span::current();
        otel::record_agent_result(&span, result.is_ok(), attempts, elapsed.as_millis() as u64);
        if let Err(e) = &result {
            otel::record_error_kind(&span, e.kind());
        }
        result
    }

    /// Failed metric for a handler that could not be invoked at all.
    fn record_unreachable(&self, execution_id: Uuid, key: &str, err: &DispatchError) {
        let metric = ExecutionMetric::start(key, execution_id)
            .finish(false, Duration::ZERO)
            .with_error(err.kind());
        self.monitor.record(metric);
    }

    fn enqueue_follow_ups(
        &self,
        decision: &RoutingDecision,
        classification: &ClassificationResult,
        task: &Task,
    ) -> Vec<String> {
        if !decision.should_parallel || classification.complexity != Complexity::Complex {
            return Vec::new();
        }
        let mut queued = Vec::new();
        for key in &decision.follow_up_agents {
            let Some(descriptor) = self.registry.get(key).filter(|d| d.enabled) else {
                warn!(agent = %key, "Follow-up agent not available");
                continue;
            };
            let follow_up = Task::new("follow_up", task.input.clone(), task.context.clone())
                .with_priority(self.config.follow_up_priority)
                .with_history(task.message_history.clone());
            match self.queue.enqueue(
                descriptor.agent().clone(),
                follow_up,
                self.config.follow_up_priority,
            ) {
                Ok(_) => queued.push(descriptor.key.clone()),
                Err(e) => warn!(agent = %key, error = %e, "Could not queue follow-up"),
            }
        }
        queued
    }

    async fn load_history(&self, context: &TaskContext) -> Vec<Message> {
        let (Some(store), Some(session)) = (&self.conversations, &context.session_id) else {
            return Vec::new();
        };
        store
            .get_recent_messages(session, self.config.history_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(session = %session, error = %e, "Could not load conversation history");
                Vec::new()
            })
    }

    async fn remember(&self, context: &TaskContext, input: &str, result: &AgentResult) {
        let (Some(store), Some(session)) = (&self.conversations, &context.session_id) else {
            return;
        };
        let reply = result.data_text().unwrap_or_default();
        for message in [Message::user(input), Message::assistant(reply)] {
            if let Err(e) = store.append_message(session, message).await {
                warn!(session = %session, error = %e, "Could not append to conversation");
                return;
            }
        }
    }

    fn success_result(
        &self,
        execution_id: Uuid,
        started: Instant,
        agent_key: &str,
        result: AgentResult,
        trail: &Trail,
        queued_follow_ups: Vec<String>,
        classification_source: String,
    ) -> OrchestrationResult {
        let classification_confidence = trail
            .classification
            .as_ref()
            .map_or(result.confidence, |c| c.confidence);
        let confidence = match &trail.routing {
            Some(routing) => classification_confidence.min(routing.confidence),
            None => classification_confidence,
        };
        let mut metadata: HashMap<String, Value> = result.metadata.clone();
        metadata.insert("classification_source".into(), Value::from(classification_source));
        metadata.insert("agent_confidence".into(), Value::from(result.confidence));

        OrchestrationResult {
            execution_id,
            success: true,
            message: result.data_text().unwrap_or_default(),
            response: result.data,
            agents_used: vec![agent_key.to_string()],
            classification: trail.classification.clone(),
            routing: trail.routing.clone(),
            confidence,
            used_fallback: trail.used_fallback,
            error_kind: None,
            queued_follow_ups,
            duration_ms: started.elapsed().as_millis() as u64,
            metadata,
        }
    }
}

fn failure_result(
    execution_id: Uuid,
    started: Instant,
    trail: Trail,
    err: &DispatchError,
) -> OrchestrationResult {
    let mut metadata = HashMap::new();
    metadata.insert("error_kind".to_string(), Value::from(err.kind().to_string()));
    metadata.insert("attempted_agents".to_string(), Value::from(trail.attempted));
    if !err.causes().is_empty() {
        let causes: Vec<Value> = err.causes().iter().map(|c| Value::from(c.to_string())).collect();
        metadata.insert("causes".to_string(), Value::Array(causes));
    }
    OrchestrationResult {
        execution_id,
        success: false,
        response: None,
        message: format!("Request could not be completed: {err}"),
        agents_used: Vec::new(),
        classification: trail.classification,
        routing: trail.routing,
        confidence: 0.0,
        used_fallback: trail.used_fallback,
        error_kind: Some(err.kind()),
        queued_follow_ups: Vec::new(),
        duration_ms: started.elapsed().as_millis() as u64,
        metadata,
    }
}

fn default_strategy(
    config: &OrchestratorConfig,
    registry: &Arc<AgentRegistry>,
) -> Arc<dyn SelectionStrategy> {
    match config.selection {
        SelectionKind::Router => Arc::new(
            RouterBased::new(registry.clone(), config.router_agent.clone())
                .with_timeout(config.agent_timeout()),
        ),
        SelectionKind::Capability => Arc::new(CapabilityBased),
        SelectionKind::RoundRobin => Arc::new(RoundRobin::new()),
        SelectionKind::WeightedRandom => Arc::new(WeightedRandom::new(config.weights.clone())),
    }
}

/// Records follow-up runs in the monitor like any other invocation.
fn follow_up_hook(monitor: Arc<PerformanceMonitor>) -> CompletionHook {
    Arc::new(move |outcome: &QueueOutcome| {
        let mut metric = ExecutionMetric::start(outcome.agent_key.clone(), outcome.task_id)
            .finish(outcome.success, Duration::from_millis(outcome.duration_ms));
        if let Some(kind) = outcome.error_kind {
            metric = metric.with_error(kind);
        }
        monitor.record(metric);
    })
}

/// Assembles an [`Orchestrator`]; every part not supplied is built from the
/// configuration.
pub struct OrchestratorBuilder {
    config: DispatchConfig,
    registry: Option<Arc<AgentRegistry>>,
    model: Option<SharedLanguageModel>,
    prompts: Option<Arc<dyn PromptProvider>>,
    strategy: Option<Arc<dyn SelectionStrategy>>,
    pipeline: Option<MiddlewarePipeline>,
    queue: Option<Arc<TaskQueue>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    telemetry: Option<SharedTelemetrySink>,
    conversations: Option<SharedConversationStore>,
}

impl OrchestratorBuilder {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            registry: None,
            model: None,
            prompts: None,
            strategy: None,
            pipeline: None,
            queue: None,
            monitor: None,
            telemetry: None,
            conversations: None,
        }
    }

    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enables the model-backed classification tier.
    pub fn model(mut self, model: SharedLanguageModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptProvider>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn pipeline(mut self, pipeline: MiddlewarePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn telemetry(mut self, telemetry: SharedTelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn conversations(mut self, store: SharedConversationStore) -> Self {
        self.conversations = Some(store);
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    ///
    /// Starts the follow-up queue unless one was supplied, so it must be
    /// called inside a Tokio runtime.
    pub fn build(self) -> DispatchResult<Orchestrator> {
        self.config.validate()?;
        let config = self.config;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(AgentRegistry::new()));
        let prompts = self.prompts.unwrap_or_else(|| {
            Arc::new(StaticPromptProvider::with_overrides(config.prompts.clone()))
        });
        let mut classifier =
            Classifier::new(config.classifier.clone(), config.routing_table(), prompts);
        if let Some(model) = self.model {
            classifier = classifier.with_model(model);
        }
        let strategy = self
            .strategy
            .unwrap_or_else(|| default_strategy(&config.orchestrator, &registry));
        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(PerformanceMonitor::new(config.monitor.clone())));
        let queue = match self.queue {
            Some(queue) => queue,
            None => Arc::new(TaskQueue::start_with(
                &config.queue,
                Some(config.orchestrator.agent_timeout()),
                Some(follow_up_hook(monitor.clone())),
            )),
        };

        info!(
            selection = %strategy.kind(),
            fallback = %config.orchestrator.fallback_agent,
            agents = registry.len(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            registry,
            classifier,
            strategy,
            pipeline: self
                .pipeline
                .unwrap_or_else(|| MiddlewarePipeline::standard(&config.middleware)),
            breakers: Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker.failure_threshold,
                config.circuit_breaker.reset_timeout(),
            )),
            retry: config.retry.build_policy(),
            queue,
            monitor,
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(TracingTelemetrySink)),
            conversations: self.conversations,
            config: config.orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Capability};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn capabilities(&self) -> Vec<Capability> {
            Vec::new()
        }

        async fn process(&self, _task: &Task) -> DispatchResult<AgentResult> {
            Ok(AgentResult::success(self.0, 1.0))
        }
    }

    fn descriptors(names: &[&'static str]) -> Vec<AgentDescriptor> {
        names
            .iter()
            .map(|n| AgentDescriptor::new(Arc::new(Named(n))))
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_target_corrected_and_penalized() {
        let orchestrator = Orchestrator::builder(DispatchConfig::default()).build().unwrap();
        let candidates = descriptors(&["QA Specialist", "General Assistant"]);
        let decision = orchestrator.validate_decision(
            RoutingDecision {
                target_agent: "event-processor".into(),
                confidence: 0.8,
                should_parallel: true,
                follow_up_agents: vec![
                    "qa-specialist".into(),
                    "general-assistant".into(),
                    "general-assistant".into(),
                ],
            },
            &candidates,
        );
        assert_eq!(decision.target_agent, "qa-specialist");
        assert!((decision.confidence - 0.4).abs() < 1e-9);
        assert_eq!(decision.follow_up_agents, vec!["general-assistant".to_string()]);
        assert!(decision.should_parallel);
    }

    #[tokio::test]
    async fn test_valid_target_untouched() {
        let orchestrator = Orchestrator::builder(DispatchConfig::default()).build().unwrap();
        let candidates = descriptors(&["QA Specialist"]);
        let decision = orchestrator.validate_decision(
            RoutingDecision {
                target_agent: "qa-specialist".into(),
                confidence: 0.7,
                should_parallel: true,
                follow_up_agents: vec!["qa-specialist".into()],
            },
            &candidates,
        );
        assert_eq!(decision.confidence, 0.7);
        assert!(decision.follow_up_agents.is_empty());
        assert!(!decision.should_parallel);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = DispatchConfig::default();
        config.queue.max_concurrency = 0;
        let err = Orchestrator::builder(config).build().err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
