use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;
use crate::domain::schema::{SlotMap, SlotName, SlotSchema, SlotValue};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Slot the assistant asked about in this turn, if it asked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asked_slot: Option<SlotName>,
    /// Disambiguation choices offered alongside the question.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: Role::User, text: text.into(), at, asked_slot: None, options: Vec::new() }
    }

    pub fn assistant(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: Role::Assistant, text: text.into(), at, asked_slot: None, options: Vec::new() }
    }

    pub fn asking(mut self, slot: SlotName, options: Vec<String>) -> Self {
        self.asked_slot = Some(slot);
        self.options = options;
        self
    }
}

/// Persisted per-session conversation state.
///
/// `missing_slots` is intentionally not a field: it is always derived from
/// `intent` and `slots` so it can never be stored stale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub history: Vec<ConversationTurn>,
    pub intent: Intent,
    pub slots: SlotMap,
    pub turn_count: u64,
    #[serde(default)]
    pub ask_streak: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            history: Vec::new(),
            intent: Intent::Unset,
            slots: SlotMap::new(),
            turn_count: 0,
            ask_streak: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn schema(&self) -> Option<&'static SlotSchema> {
        SlotSchema::for_intent(self.intent)
    }

    pub fn missing_slots(&self) -> Vec<SlotName> {
        self.schema().map(|schema| schema.missing(&self.slots)).unwrap_or_default()
    }

    /// A task intent with required slots still outstanding.
    pub fn is_filling_slots(&self) -> bool {
        self.intent.is_task() && !self.missing_slots().is_empty()
    }

    /// Moves to `intent`, dropping slots collected for a different one.
    pub fn switch_intent(&mut self, intent: Intent) {
        if self.intent != intent {
            self.intent = intent;
            self.slots.clear();
            self.ask_streak = 0;
        }
    }

    /// Forgets the in-progress task while keeping the history.
    pub fn restart(&mut self) {
        self.intent = Intent::Unset;
        self.slots.clear();
        self.ask_streak = 0;
    }

    pub fn accept_slot(&mut self, slot: SlotName, value: SlotValue) -> Result<(), DomainError> {
        let allowed = self.schema().map(|schema| schema.allows(slot)).unwrap_or(false);
        if !allowed || !value.fits(slot) {
            return Err(DomainError::SlotOutsideSchema { slot, intent: self.intent });
        }
        self.slots.insert(slot, value);
        Ok(())
    }

    pub fn begin_turn(&mut self, text: &str, now: DateTime<Utc>) {
        self.turn_count = self.turn_count.saturating_add(1);
        self.history.push(ConversationTurn::user(text, now));
        self.updated_at = now;
    }

    pub fn record_reply(&mut self, turn: ConversationTurn) {
        self.ask_streak = match turn.asked_slot {
            Some(slot) => self.next_ask_streak(slot),
            None => 0,
        };
        self.updated_at = turn.at;
        self.history.push(turn);
    }

    /// How many consecutive turns `slot` will have been asked if asked now.
    pub fn next_ask_streak(&self, slot: SlotName) -> u32 {
        if self.last_question().and_then(|last| last.asked_slot) == Some(slot) {
            self.ask_streak.saturating_add(1)
        } else {
            1
        }
    }

    /// The most recent assistant turn, if any.
    pub fn last_question(&self) -> Option<&ConversationTurn> {
        self.history.iter().rev().find(|turn| turn.role == Role::Assistant)
    }

    /// Keeps at most `window` turns, dropping the oldest first. Zero disables trimming.
    pub fn trim_history(&mut self, window: usize) {
        if window > 0 && self.history.len() > window {
            let excess = self.history.len() - window;
            self.history.drain(..excess);
        }
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.session_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation("session id is empty".to_string()));
        }

        let Some(schema) = self.schema() else {
            if self.slots.is_empty() {
                return Ok(());
            }
            return Err(DomainError::InvariantViolation(
                "slots present while intent is UNSET".to_string(),
            ));
        };

        for (slot, value) in &self.slots {
            if !schema.allows(*slot) || !value.fits(*slot) {
                return Err(DomainError::SlotOutsideSchema { slot: *slot, intent: self.intent });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{ConversationState, ConversationTurn, Role, SessionId};
    use crate::domain::intent::Intent;
    use crate::domain::schema::{SlotName, SlotValue};
    use crate::errors::DomainError;

    fn fresh() -> ConversationState {
        let now = Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).single().expect("timestamp");
        ConversationState::new(SessionId::from("s-1"), now)
    }

    #[test]
    fn fresh_state_is_unset_and_valid() {
        let state = fresh();
        assert_eq!(state.intent, Intent::Unset);
        assert!(state.slots.is_empty());
        assert!(state.missing_slots().is_empty());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn switching_intent_clears_prior_slots() {
        let mut state = fresh();
        state.switch_intent(Intent::Weather);
        state
            .accept_slot(SlotName::Location, SlotValue::Place("Toronto".to_string()))
            .expect("location belongs to weather");
        assert!(state.missing_slots().is_empty());

        state.switch_intent(Intent::Travel);
        assert!(state.slots.is_empty());
        assert_eq!(state.missing_slots().len(), 4);
    }

    #[test]
    fn switching_to_same_intent_keeps_slots() {
        let mut state = fresh();
        state.switch_intent(Intent::Weather);
        state
            .accept_slot(SlotName::Location, SlotValue::Place("Paris".to_string()))
            .expect("accept location");
        state.switch_intent(Intent::Weather);
        assert_eq!(state.slots.len(), 1);
    }

    #[test]
    fn slots_outside_schema_are_refused() {
        let mut state = fresh();
        state.switch_intent(Intent::Weather);
        let error = state
            .accept_slot(SlotName::Origin, SlotValue::Place("LHR".to_string()))
            .expect_err("origin is a travel slot");
        assert!(matches!(error, DomainError::SlotOutsideSchema { .. }));

        let error = state
            .accept_slot(SlotName::Location, SlotValue::Count(3))
            .expect_err("count does not fit a place slot");
        assert!(matches!(error, DomainError::SlotOutsideSchema { .. }));
    }

    #[test]
    fn invariant_check_catches_foreign_slots() {
        let mut state = fresh();
        state.intent = Intent::Weather;
        state.slots.insert(
            SlotName::DepartDate,
            SlotValue::Date(NaiveDate::from_ymd_opt(2030, 3, 2).expect("date")),
        );
        assert!(state.check_invariants().is_err());

        let mut state = fresh();
        state.slots.insert(SlotName::Location, SlotValue::Place("Oslo".to_string()));
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn ask_streak_counts_repeated_questions_for_same_slot() {
        let mut state = fresh();
        let at = state.created_at;
        state.record_reply(ConversationTurn::assistant("Which city?", at).asking(SlotName::Location, Vec::new()));
        state.record_reply(ConversationTurn::assistant("Which city?", at).asking(SlotName::Location, Vec::new()));
        assert_eq!(state.ask_streak, 2);

        state.record_reply(ConversationTurn::assistant("Which date?", at).asking(SlotName::Date, Vec::new()));
        assert_eq!(state.ask_streak, 1);

        state.record_reply(ConversationTurn::assistant("Sunny.", at));
        assert_eq!(state.ask_streak, 0);
    }

    #[test]
    fn history_window_drops_oldest_turns() {
        let mut state = fresh();
        let at = state.created_at;
        for index in 0..6 {
            state.begin_turn(&format!("message {index}"), at);
        }
        state.trim_history(4);

        assert_eq!(state.history.len(), 4);
        assert_eq!(state.history[0].text, "message 2");
        assert_eq!(state.history[0].role, Role::User);
        assert_eq!(state.turn_count, 6);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut state = fresh();
        state.switch_intent(Intent::Travel);
        state.accept_slot(SlotName::PaxAdults, SlotValue::Count(2)).expect("pax");
        let encoded = serde_json::to_string(&state).expect("encode state");
        let decoded: ConversationState = serde_json::from_str(&encoded).expect("decode state");
        assert_eq!(decoded, state);
    }
}
