use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use parley_core::chrono::{DateTime, Utc};
use parley_core::domain::conversation::{ConversationState, SessionId};
use parley_core::policy::{Clock, SystemClock};

use super::{decode_state, encode_state, is_expired, RepositoryError, SessionStore};

struct StoredSession {
    payload: String,
    updated_at: DateTime<Utc>,
}

/// Process-local session store. States are kept serialized so reads go through
/// the same decode checks as the sqlite store.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(None, Arc::new(SystemClock))
    }
}

impl InMemorySessionStore {
    pub fn new(ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl, clock }
    }

    /// Stores a raw payload as-is, e.g. when importing sessions from elsewhere.
    pub async fn insert_raw(&self, id: &SessionId, payload: impl Into<String>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id.0.clone(),
            StoredSession { payload: payload.into(), updated_at: self.clock.now() },
        );
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let Some(stored) = sessions.get(&id.0) else {
            return Ok(None);
        };
        if is_expired(stored.updated_at, self.clock.now(), self.ttl) {
            return Ok(None);
        }
        decode_state(id, &stored.payload).map(Some)
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let payload = encode_state(state)?;
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            state.session_id.0.clone(),
            StoredSession { payload, updated_at: self.clock.now() },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| !is_expired(stored.updated_at, now, self.ttl));
        Ok((before - sessions.len()) as u64)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
