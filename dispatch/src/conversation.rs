//! Conversation history capability.
//!
//! Persistence is the embedding application's concern. The orchestrator
//! only reads recent turns into a task and appends the exchange afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::types::Message;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, owner_id: &str, channel: &str) -> DispatchResult<String>;

    async fn append_message(&self, session_id: &str, message: Message) -> DispatchResult<()>;

    /// Up to `limit` most recent messages, oldest first.
    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> DispatchResult<Vec<Message>>;
}

pub type SharedConversationStore = Arc<dyn ConversationStore>;

#[derive(Debug)]
struct Session {
    owner_id: String,
    channel: String,
    messages: Vec<Message>,
}

/// Process-local store, mostly for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedConversationStore {
        Arc::new(self)
    }

    /// Owner and channel of a session, if it exists.
    pub async fn session_info(&self, session_id: &str) -> Option<(String, String)> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| (s.owner_id.clone(), s.channel.clone()))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_session(&self, owner_id: &str, channel: &str) -> DispatchResult<String> {
        let id = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(
            id.clone(),
            Session {
                owner_id: owner_id.to_string(),
                channel: channel.to_string(),
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append_message(&self, session_id: &str, message: Message) -> DispatchResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| DispatchError::validation(format!("unknown session '{session_id}'")))?;
        session.messages.push(message);
        Ok(())
    }

    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> DispatchResult<Vec<Message>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| DispatchError::validation(format!("unknown session '{session_id}'")))?;
        let skip = session.messages.len().saturating_sub(limit);
        Ok(session.messages[skip..].to_vec())
    }
}
