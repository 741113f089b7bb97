//! Request Router Module
//!
//! Turns raw input into a handler choice:
//! - [`classifier`]: cache → pattern table → language model
//! - [`selection`]: pluggable strategies picking one candidate agent
//! - [`circuit_breaker`]: per-agent failure isolation
//!
//! # Default routing table
//!
//! ```text
//! Message type  | Candidates (in order)
//! --------------|------------------------------------
//! question      | qa-specialist, general-assistant
//! event         | event-processor
//! complex_task  | task-orchestrator, qa-specialist
//! chat          | general-assistant
//! irrelevant    | general-assistant
//! ```

pub mod circuit_breaker;
pub mod classifier;
pub mod patterns;
pub mod selection;

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::types::MessageType;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
pub use classifier::{ClassificationSource, Classifier};
pub use selection::{
    CapabilityBased, RoundRobin, RouterBased, SelectionKind, SelectionStrategy, WeightedRandom,
};

/// Ordered candidate agent keys per message type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingTable {
    routes: HashMap<MessageType, Vec<String>>,
}

impl RoutingTable {
    /// Table with no routes at all.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Default table with `overrides` replacing whole rows.
    pub fn with_overrides(overrides: &HashMap<MessageType, Vec<String>>) -> Self {
        let mut table = Self::default();
        for (message_type, keys) in overrides {
            table.set(*message_type, keys.clone());
        }
        table
    }

    pub fn set(&mut self, message_type: MessageType, keys: Vec<String>) {
        self.routes.insert(message_type, keys);
    }

    /// Candidate keys for a message type; empty when unrouted.
    pub fn candidates(&self, message_type: MessageType) -> &[String] {
        self.routes
            .get(&message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every key mentioned anywhere in the table.
    pub fn all_keys(&self) -> BTreeSet<String> {
        self.routes.values().flatten().cloned().collect()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        let row = |keys: &[&str]| keys.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        let mut table = Self::empty();
        table.set(MessageType::Question, row(&["qa-specialist", "general-assistant"]));
        table.set(MessageType::Event, row(&["event-processor"]));
        table.set(
            MessageType::ComplexTask,
            row(&["task-orchestrator", "qa-specialist"]),
        );
        table.set(MessageType::Chat, row(&["general-assistant"]));
        table.set(MessageType::Irrelevant, row(&["general-assistant"]));
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes_cover_every_type() {
        let table = RoutingTable::default();
        for t in MessageType::all() {
            assert!(!table.candidates(*t).is_empty(), "{t}");
        }
        assert_eq!(
            table.candidates(MessageType::Question),
            ["qa-specialist", "general-assistant"]
        );
    }

    #[test]
    fn test_overrides_replace_rows() {
        let mut overrides = HashMap::new();
        overrides.insert(MessageType::Event, vec!["calendar".to_string()]);
        let table = RoutingTable::with_overrides(&overrides);
        assert_eq!(table.candidates(MessageType::Event), ["calendar"]);
        assert_eq!(table.candidates(MessageType::Chat), ["general-assistant"]);
        assert!(table.all_keys().contains("calendar"));
        assert!(!table.all_keys().contains("event-processor"));
    }
}
