//! Conversation-to-session storage capability.

use crate::error::Result;
use crate::{ConversationKey, SessionId};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Key-value storage for the conversation → session mapping.
///
/// Entries are written once and never updated. Implementations must make
/// `put_if_absent` atomic per key; the in-memory store is the default and a
/// durable backend only needs to honour the same two calls.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Look up the session mapped to `key`.
    async fn get(&self, key: &ConversationKey) -> Result<Option<SessionId>>;

    /// Store `session` under `key` unless a mapping exists. Returns the session
    /// that is mapped after the call (the existing one if there was one).
    async fn put_if_absent(&self, key: &ConversationKey, session: SessionId) -> Result<SessionId>;
}

/// Process-lifetime store. Mappings are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    entries: RwLock<HashMap<ConversationKey, SessionId>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mapped conversations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, key: &ConversationKey) -> Result<Option<SessionId>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put_if_absent(&self, key: &ConversationKey, session: SessionId) -> Result<SessionId> {
        let mut entries = self.entries.write().await;
        Ok(entries.entry(key.clone()).or_insert(session).clone())
    }
}
