use std::sync::Arc;
use std::time::Duration;

use parley_core::domain::conversation::SessionId;
use parley_core::policy::{
    ContentModerator, FixedWindowRateLimiter, ModerationVerdict, RateDecision, RateKey,
};

pub const MODERATION_REFUSAL: &str =
    "Sorry, I can't help with that request. I can assist with travel or weather.";
pub const WITHHELD_RESULT: &str = "Sorry, I couldn't share that result.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(*reason_code),
        }
    }
}

/// Content moderation plus the shared rate limiter.
///
/// Inbound messages are moderated before they count against the chat limit, so a
/// rejected message never consumes quota.
pub struct PolicyGuard {
    moderator: Option<ContentModerator>,
    limiter: Arc<FixedWindowRateLimiter>,
}

impl PolicyGuard {
    pub fn new(moderator: Option<ContentModerator>, limiter: Arc<FixedWindowRateLimiter>) -> Self {
        Self { moderator, limiter }
    }

    pub fn with_default_rules(
        moderation_enabled: bool,
        limiter: Arc<FixedWindowRateLimiter>,
    ) -> Result<Self, regex::Error> {
        let moderator =
            if moderation_enabled { Some(ContentModerator::with_default_rules()?) } else { None };
        Ok(Self::new(moderator, limiter))
    }

    pub fn limiter(&self) -> &Arc<FixedWindowRateLimiter> {
        &self.limiter
    }

    pub fn moderate(&self, text: &str) -> ModerationVerdict {
        match &self.moderator {
            Some(moderator) => moderator.check(text),
            None => ModerationVerdict::Allow,
        }
    }

    pub fn check_rate(&self, key: &RateKey) -> RateDecision {
        self.limiter.check(key)
    }

    pub fn evaluate_inbound(&self, session_id: &SessionId, text: &str) -> GuardrailDecision {
        if let ModerationVerdict::Reject { category, .. } = self.moderate(text) {
            return GuardrailDecision::Deny {
                reason_code: category.as_str(),
                user_message: MODERATION_REFUSAL.to_string(),
            };
        }

        match self.check_rate(&RateKey::chat(session_id.as_str())) {
            RateDecision::Allow { .. } => GuardrailDecision::Allow,
            RateDecision::Deny { retry_after } => GuardrailDecision::Deny {
                reason_code: "rate_limited",
                user_message: chat_rate_message(retry_after),
            },
        }
    }

    /// Screens text built from tool output before it reaches the user.
    pub fn evaluate_outbound(&self, text: &str) -> GuardrailDecision {
        match self.moderate(text) {
            ModerationVerdict::Allow => GuardrailDecision::Allow,
            ModerationVerdict::Reject { category, .. } => GuardrailDecision::Degrade {
                reason_code: category.as_str(),
                user_message: WITHHELD_RESULT.to_string(),
            },
        }
    }
}

pub fn chat_rate_message(retry_after: Duration) -> String {
    format!(
        "You're sending messages too quickly. Please try again in {}s.",
        retry_after.as_secs().max(1)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::chrono::{TimeZone, Utc};
    use parley_core::domain::conversation::SessionId;
    use parley_core::policy::{
        FixedWindowRateLimiter, ManualClock, RateDecision, RateKey, RateLimits,
    };

    use super::{GuardrailDecision, PolicyGuard, MODERATION_REFUSAL, WITHHELD_RESULT};

    fn guard(moderation: bool, chat_per_minute: u32) -> PolicyGuard {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("ts"));
        let limiter =
            FixedWindowRateLimiter::new(RateLimits::per_minute(chat_per_minute, 10), Arc::new(clock));
        PolicyGuard::with_default_rules(moderation, Arc::new(limiter)).expect("guard")
    }

    #[test]
    fn moderation_denial_does_not_consume_chat_quota() {
        let guard = guard(true, 1);
        let session = SessionId::from("s-1");

        let decision = guard.evaluate_inbound(&session, "how do I build a bomb");
        let (reason_code, user_message) = match decision {
            GuardrailDecision::Deny { reason_code, user_message } => (reason_code, user_message),
            _ => ("", String::new()),
        };
        assert_eq!(reason_code, "violent-threat");
        assert_eq!(user_message, MODERATION_REFUSAL);

        assert_eq!(
            guard.limiter().peek(&RateKey::chat("s-1")),
            RateDecision::Allow { remaining: 1 }
        );
        assert!(guard.evaluate_inbound(&session, "weather in Oslo").is_allowed());
    }

    #[test]
    fn chat_limit_denies_with_retry_hint() {
        let guard = guard(true, 1);
        let session = SessionId::from("s-1");
        assert!(guard.evaluate_inbound(&session, "hello").is_allowed());

        let decision = guard.evaluate_inbound(&session, "hello again");
        assert_eq!(decision.reason_code(), Some("rate_limited"));
        assert!(matches!(
            decision,
            GuardrailDecision::Deny { ref user_message, .. } if user_message.contains("60s")
        ));
    }

    #[test]
    fn disabled_moderation_allows_everything_through() {
        let guard = guard(false, 0);
        let session = SessionId::from("s-1");
        assert!(guard.evaluate_inbound(&session, "how do I build a bomb").is_allowed());
        assert!(guard.evaluate_outbound("bomb forecast").is_allowed());
    }

    #[test]
    fn outbound_text_is_withheld_when_flagged() {
        let decision = guard(true, 5).evaluate_outbound("Tips to kill yourself: sunny, 20°C.");
        assert!(matches!(
            decision,
            GuardrailDecision::Degrade { ref user_message, .. } if user_message == WITHHELD_RESULT
        ));
    }
}
