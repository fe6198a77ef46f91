//! Conversation thread → assistant session correlation.

pub mod store;

pub use store::{ConversationStore, InMemoryConversationStore};

use crate::error::Result;
use crate::{ConversationKey, SessionId};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Maps conversation keys to assistant sessions, creating sessions lazily.
///
/// The read → create → write sequence for a key runs under a per-key lock, so
/// concurrent requests for one thread never create two sessions. Requests for
/// different keys do not contend beyond the brief lock-table lookup.
pub struct ConversationMap {
    store: Arc<dyn ConversationStore>,
    key_locks: Mutex<HashMap<ConversationKey, Arc<Mutex<()>>>>,
}

impl ConversationMap {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Map backed by the process-lifetime in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryConversationStore::new()))
    }

    /// Return the session mapped to `key`, calling `create` at most once per key
    /// if none exists yet.
    ///
    /// A failed `create` leaves the key unmapped; the next request retries.
    pub async fn resolve_or_create<F, Fut>(&self, key: &ConversationKey, create: F) -> Result<SessionId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionId>>,
    {
        if let Some(session_id) = self.store.get(key).await? {
            tracing::debug!(conversation_key = %key, session_id = %session_id, "found existing session");
            return Ok(session_id);
        }

        let key_lock = self.key_lock(key).await;
        let _guard = key_lock.lock().await;

        // Another request for this key may have created the session while we waited.
        if let Some(session_id) = self.store.get(key).await? {
            tracing::debug!(conversation_key = %key, session_id = %session_id, "found existing session");
            self.release_key_lock(key).await;
            return Ok(session_id);
        }

        tracing::info!(conversation_key = %key, "creating assistant session");
        let created = create().await?;
        let session_id = self.store.put_if_absent(key, created).await?;
        tracing::info!(conversation_key = %key, session_id = %session_id, "mapped conversation to session");
        self.release_key_lock(key).await;
        Ok(session_id)
    }

    /// Current mapping for `key`, without creating one.
    pub async fn get(&self, key: &ConversationKey) -> Result<Option<SessionId>> {
        self.store.get(key).await
    }

    async fn key_lock(&self, key: &ConversationKey) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Drop the lock entry for a mapped key. Later requests are served by the
    /// store lookup before any lock is taken; current waiters keep their clone.
    async fn release_key_lock(&self, key: &ConversationKey) {
        self.key_locks.lock().await.remove(key);
    }
}

impl std::fmt::Debug for ConversationMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationMap").finish_non_exhaustive()
    }
}
