//! Agent Registry: handler metadata and capability lookup
//!
//! Agents are registered under a key derived from their display name (see
//! [`normalize_key`]). Registering a second agent whose name normalizes to an
//! existing key replaces the earlier one (last write wins).

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use crate::agent::{Capability, SharedAgent};

/// Derive a registry key from a display name.
///
/// Keeps ASCII letters, digits and separators (whitespace and `-`), drops
/// everything else, joins words with a single hyphen and lower-cases the
/// result. Pure and idempotent: `normalize_key(&normalize_key(x)) ==
/// normalize_key(x)`.
///
/// ```
/// use dispatch::registry::normalize_key;
/// assert_eq!(normalize_key("Q&A Specialist"), "qa-specialist");
/// assert_eq!(normalize_key("Event Parser (v2.0)"), "event-parser-v20");
/// assert_eq!(normalize_key("   "), "");
/// ```
pub fn normalize_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !key.is_empty() {
                key.push('-');
            }
            pending_separator = false;
            key.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            pending_separator = true;
        }
    }
    key
}

/// Immutable metadata for a registered agent plus its handler.
#[derive(Clone, Serialize)]
pub struct AgentDescriptor {
    pub key: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub enabled: bool,
    #[serde(skip)]
    agent: SharedAgent,
}

impl AgentDescriptor {
    /// Describe an agent from its own name and capabilities.
    pub fn new(agent: SharedAgent) -> Self {
        let name = agent.name().to_string();
        let mut capabilities: Vec<Capability> = Vec::new();
        for cap in agent.capabilities() {
            if !capabilities.iter().any(|c| c.tag == cap.tag) {
                capabilities.push(cap);
            }
        }
        Self {
            key: normalize_key(&name),
            name,
            capabilities,
            enabled: true,
            agent,
        }
    }

    /// Same descriptor, registered disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn agent(&self) -> &SharedAgent {
        &self.agent
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.tag == tag)
    }

    /// Confidence for a capability tag, 0.0 when absent.
    pub fn capability_confidence(&self, tag: &str) -> f64 {
        self.capabilities
            .iter()
            .find(|c| c.tag == tag)
            .map(|c| c.confidence)
            .unwrap_or(0.0)
    }
}

impl fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Registry of all routable agents, safe to share across tasks.
#[derive(Default)]
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentDescriptor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any earlier one with the same key.
    pub fn register(&self, descriptor: AgentDescriptor) {
        let key = descriptor.key.clone();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = entries.insert(key.clone(), descriptor) {
            debug!(key = %key, previous = %previous.name, "Agent registration replaced");
        } else {
            info!(key = %key, "Agent registered");
        }
    }

    /// Register an agent under the key derived from its name; returns the key.
    pub fn register_agent(&self, agent: SharedAgent) -> String {
        let descriptor = AgentDescriptor::new(agent);
        let key = descriptor.key.clone();
        self.register(descriptor);
        key
    }

    /// Look up by key. The argument is normalized first, so display names work.
    pub fn get(&self, key: &str) -> Option<AgentDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&normalize_key(key)).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&normalize_key(key))
    }

    /// Snapshot of every registered descriptor.
    pub fn get_all(&self) -> HashMap<String, AgentDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unregister(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(&normalize_key(key)).is_some();
        if removed {
            info!(key, "Agent unregistered");
        }
        removed
    }

    /// Enabled descriptors for the given keys, in the order given; unknown
    /// and disabled keys are skipped.
    pub fn enabled_in_order(&self, keys: &[String]) -> Vec<AgentDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        for key in keys {
            let key = normalize_key(key);
            if seen.contains(&key) {
                continue;
            }
            if let Some(d) = entries.get(&key).filter(|d| d.enabled) {
                out.push(d.clone());
            }
            seen.push(key);
        }
        out
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
