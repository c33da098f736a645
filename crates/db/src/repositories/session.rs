use std::sync::Arc;
use std::time::Duration;

use parley_core::chrono::{DateTime, SecondsFormat, Utc};
use parley_core::domain::conversation::{ConversationState, SessionId};
use parley_core::policy::{Clock, SystemClock};
use sqlx::{sqlite::SqliteRow, Row};

use super::{decode_state, encode_state, is_expired, RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, ttl: None, clock: Arc::new(SystemClock) }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_id, state_json, updated_at
             FROM conversation_session
             WHERE session_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let updated_at = parse_timestamp(&row, "updated_at")?;
        if is_expired(updated_at, self.clock.now(), self.ttl) {
            return Ok(None);
        }

        let payload: String = row.try_get("state_json")?;
        decode_state(id, &payload).map(Some)
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let payload = encode_state(state)?;
        let turn_count = i64::try_from(state.turn_count).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO conversation_session (
                session_id,
                intent,
                turn_count,
                state_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                intent = excluded.intent,
                turn_count = excluded.turn_count,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
        )
        .bind(&state.session_id.0)
        .bind(state.intent.as_str())
        .bind(turn_count)
        .bind(payload)
        .bind(format_timestamp(state.created_at))
        .bind(format_timestamp(self.clock.now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let Some(ttl) = self.ttl else {
            return Ok(0);
        };
        let ttl = parley_core::chrono::Duration::from_std(ttl)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let cutoff = self.clock.now() - ttl;

        let result = sqlx::query("DELETE FROM conversation_session WHERE updated_at <= ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so lexical order matches time order in SQL.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid `{column}` timestamp: {error}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parley_core::chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
    use parley_core::domain::conversation::{ConversationState, SessionId};
    use parley_core::domain::intent::Intent;
    use parley_core::domain::schema::{SlotName, SlotValue};
    use parley_core::policy::{Clock, ManualClock};

    use crate::migrations::run_pending;
    use crate::repositories::{SessionStore, SqlSessionStore};
    use crate::{connect_with_settings, DbPool};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2030, 4, 1, 8, 0, 0).single().expect("ts"))
    }

    #[tokio::test]
    async fn sql_session_round_trip_preserves_slots() {
        let clock = clock();
        let store = SqlSessionStore::new(migrated_pool().await).with_clock(Arc::new(clock.clone()));
        let mut state = ConversationState::new(SessionId::from("wa:+15550100"), clock.now());
        state.switch_intent(Intent::Weather);
        state
            .accept_slot(SlotName::Location, SlotValue::Place("Toronto".to_string()))
            .expect("location");
        state
            .accept_slot(
                SlotName::Date,
                SlotValue::Date(NaiveDate::from_ymd_opt(2030, 4, 2).expect("date")),
            )
            .expect("date");
        state.begin_turn("weather in Toronto tomorrow", clock.now());

        store.save(&state).await.expect("save");
        let found = store.load(&state.session_id).await.expect("load");

        assert_eq!(found, Some(state));
        store.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn sql_save_overwrites_previous_state() {
        let clock = clock();
        let store = SqlSessionStore::new(migrated_pool().await).with_clock(Arc::new(clock.clone()));
        let mut state = ConversationState::new(SessionId::from("s-1"), clock.now());
        store.save(&state).await.expect("first save");

        state.switch_intent(Intent::Travel);
        state.turn_count = 4;
        store.save(&state).await.expect("second save");

        let found = store.load(&state.session_id).await.expect("load").expect("present");
        assert_eq!(found.intent, Intent::Travel);
        assert_eq!(found.turn_count, 4);
    }

    #[tokio::test]
    async fn sql_ttl_hides_and_purges_stale_sessions() {
        let clock = clock();
        let store = SqlSessionStore::new(migrated_pool().await)
            .with_clock(Arc::new(clock.clone()))
            .with_ttl(Some(Duration::from_secs(3_600)));

        let stale = ConversationState::new(SessionId::from("stale"), clock.now());
        store.save(&stale).await.expect("save stale");
        clock.advance(ChronoDuration::minutes(30));
        let fresh = ConversationState::new(SessionId::from("fresh"), clock.now());
        store.save(&fresh).await.expect("save fresh");

        clock.advance(ChronoDuration::minutes(31));
        assert!(store.load(&stale.session_id).await.expect("load stale").is_none());
        assert!(store.load(&fresh.session_id).await.expect("load fresh").is_some());

        assert_eq!(store.purge_expired().await.expect("purge"), 1);
    }

    #[tokio::test]
    async fn unreadable_state_json_surfaces_as_corruption() {
        let pool = migrated_pool().await;
        sqlx::query(
            "INSERT INTO conversation_session
                (session_id, intent, turn_count, state_json, created_at, updated_at)
             VALUES ('broken', 'WEATHER', 1, '{\"intent\": 42}', ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("insert broken row");

        let store = SqlSessionStore::new(pool);
        let error = store.load(&SessionId::from("broken")).await.expect_err("corrupt row");
        assert!(error.is_corruption());
    }
}
