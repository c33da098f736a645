use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use parley_core::chrono::{DateTime, Utc};
use parley_core::domain::conversation::{ConversationState, SessionId};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionStore;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Stored data exists but cannot be turned back into a session.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Durable mapping from session id to conversation state.
///
/// `save` is last-writer-wins per session. Sessions whose last update is older
/// than the configured time-to-live load as `None`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError>;
    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError>;
    /// Removes expired sessions and returns how many were dropped.
    async fn purge_expired(&self) -> Result<u64, RepositoryError>;
    async fn ping(&self) -> Result<(), RepositoryError>;
}

pub(crate) fn encode_state(state: &ConversationState) -> Result<String, RepositoryError> {
    serde_json::to_string(state).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn decode_state(
    id: &SessionId,
    payload: &str,
) -> Result<ConversationState, RepositoryError> {
    let state: ConversationState = serde_json::from_str(payload).map_err(|error| {
        RepositoryError::Decode(format!("session `{id}` has unreadable state: {error}"))
    })?;
    if &state.session_id != id {
        return Err(RepositoryError::Decode(format!(
            "session `{id}` holds state for `{}`",
            state.session_id
        )));
    }
    Ok(state)
}

pub(crate) fn is_expired(
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
    ttl: Option<Duration>,
) -> bool {
    let Some(ttl) = ttl else {
        return false;
    };
    match parley_core::chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(updated_at) >= ttl,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_core::chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use parley_core::domain::conversation::{ConversationState, SessionId};

    use super::{decode_state, encode_state, is_expired};

    #[test]
    fn expiry_respects_ttl_and_never_expires_without_one() {
        let updated = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("ts");
        let ttl = Some(Duration::from_secs(3_600));

        assert!(!is_expired(updated, updated + ChronoDuration::minutes(59), ttl));
        assert!(is_expired(updated, updated + ChronoDuration::minutes(60), ttl));
        assert!(!is_expired(updated, updated + ChronoDuration::days(400), None));
    }

    #[test]
    fn decode_rejects_garbage_and_mismatched_ids() {
        let id = SessionId::from("s-1");
        let error = decode_state(&id, "{not json").expect_err("garbage");
        assert!(error.is_corruption());

        let other = ConversationState::new(SessionId::from("s-2"), Utc::now());
        let payload = encode_state(&other).expect("encode");
        assert!(decode_state(&id, &payload).expect_err("mismatch").is_corruption());
    }
}
