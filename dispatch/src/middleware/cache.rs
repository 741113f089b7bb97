//! Short-lived result cache keyed by agent, input, context and conversation
//! history.
//!
//! Cached results drop the timing metadata of the run that produced them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{BeforeOutcome, Invocation, Middleware};
use crate::cache::{hash_key, CacheStats, TtlCache};
use crate::error::DispatchResult;
use crate::types::{AgentResult, Message, TaskContext};

/// Metadata describing one particular run; never served from the cache.
const RUN_METADATA: &[&str] = &["duration_ms"];

pub struct CacheMiddleware {
    cache: TtlCache<AgentResult>,
}

/// Order-independent rendering of the context for hashing.
fn context_fingerprint(context: &TaskContext) -> String {
    let metadata: BTreeMap<&String, String> = context
        .metadata
        .iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
    format!(
        "{:?}|{:?}|{:?}|{:?}",
        context.user_id, context.channel, context.session_id, metadata
    )
}

fn history_fingerprint(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{:?}:{}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\u{1e}")
}

fn cache_key(invocation: &Invocation) -> String {
    hash_key(&[
        &invocation.agent_key,
        &invocation.task.input,
        &context_fingerprint(&invocation.task.context),
        &history_fingerprint(&invocation.task.message_history),
    ])
}

impl CacheMiddleware {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: TtlCache::new(ttl, max_entries),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    fn priority(&self) -> i32 {
        30
    }

    async fn before(&self, invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        match self.cache.get(&cache_key(invocation)) {
            Some(hit) => {
                debug!(agent = %invocation.agent_key, "Result cache hit");
                Ok(BeforeOutcome::ShortCircuit(hit.with_metadata("cache_hit", true)))
            }
            None => Ok(BeforeOutcome::Continue),
        }
    }

    async fn after(
        &self,
        invocation: &Invocation,
        result: AgentResult,
    ) -> DispatchResult<AgentResult> {
        if result.success {
            let mut cached = result.clone();
            for key in RUN_METADATA {
                cached.metadata.remove(*key);
            }
            self.cache.insert(cache_key(invocation), cached);
        }
        Ok(result)
    }
}
