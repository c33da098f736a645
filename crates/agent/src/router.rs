use std::sync::Arc;
use std::time::Duration;

use parley_core::domain::conversation::ConversationState;
use parley_core::domain::intent::Intent;

use crate::llm::IntentClassifier;

const TRAVEL_KEYWORDS: &[&str] =
    &["flight", "flights", "fly", "flying", "fare", "fares", "airport", "book", "airline"];
const WEATHER_KEYWORDS: &[&str] =
    &["weather", "rain", "raining", "temperature", "forecast", "sunny", "snow"];
const SMALLTALK_KEYWORDS: &[&str] = &["hi", "hello", "hey", "thanks", "thank"];
const RESTART_PHRASES: &[&[&str]] = &[
    &["start", "over"],
    &["reset"],
    &["never", "mind"],
    &["nevermind"],
    &["cancel"],
    &["new", "question"],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteSource {
    /// Kept the in-progress task intent.
    Sticky,
    Classifier,
    /// Keyword matching, used when the classifier is absent or unusable.
    Fallback,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Classifier => "classifier",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteDecision {
    pub intent: Intent,
    pub confidence: f32,
    pub source: RouteSource,
    /// Set when the classifier could not be used for this turn.
    pub degraded: Option<String>,
    /// The user asked to abandon the current task.
    pub restart: bool,
}

pub struct IntentRouter {
    classifier: Option<Arc<dyn IntentClassifier>>,
    timeout: Duration,
    min_confidence: f32,
}

impl IntentRouter {
    pub fn new(
        classifier: Option<Arc<dyn IntentClassifier>>,
        timeout: Duration,
        min_confidence: f32,
    ) -> Self {
        Self { classifier, timeout, min_confidence }
    }

    pub fn keyword_only() -> Self {
        Self::new(None, Duration::from_millis(0), 0.0)
    }

    pub async fn route(&self, state: &ConversationState, message: &str) -> RouteDecision {
        let restart = is_restart(message);

        if !restart && state.is_filling_slots() {
            let keyword = keyword_intent(message);
            let shifted = (keyword.is_task() && keyword != state.intent)
                || keyword == Intent::Smalltalk;
            if !shifted {
                return RouteDecision {
                    intent: state.intent,
                    confidence: 1.0,
                    source: RouteSource::Sticky,
                    degraded: None,
                    restart,
                };
            }
        }

        let Some(classifier) = &self.classifier else {
            return self.fallback(message, "classifier not configured", restart);
        };

        let classified =
            tokio::time::timeout(self.timeout, classifier.classify(&state.history, message)).await;
        match classified {
            Err(_) => self.fallback(
                message,
                &format!("classifier timed out after {}ms", self.timeout.as_millis()),
                restart,
            ),
            Ok(Err(error)) => self.fallback(message, &format!("classifier failed: {error}"), restart),
            Ok(Ok(result)) if !Intent::CLASSIFIABLE.contains(&result.intent) => self.fallback(
                message,
                &format!("classifier returned unroutable label {}", result.intent),
                restart,
            ),
            Ok(Ok(result)) if !result.confidence.is_finite() => {
                self.fallback(message, "classifier returned a non-finite confidence", restart)
            }
            Ok(Ok(result)) if result.confidence < self.min_confidence => self.fallback(
                message,
                &format!(
                    "classifier confidence {:.2} below {:.2}",
                    result.confidence, self.min_confidence
                ),
                restart,
            ),
            Ok(Ok(result)) => RouteDecision {
                intent: result.intent,
                confidence: result.confidence,
                source: RouteSource::Classifier,
                degraded: None,
                restart,
            },
        }
    }

    fn fallback(&self, message: &str, reason: &str, restart: bool) -> RouteDecision {
        RouteDecision {
            intent: keyword_intent(message),
            confidence: 0.0,
            source: RouteSource::Fallback,
            degraded: Some(reason.to_string()),
            restart,
        }
    }
}

/// Whole-word keyword routing checked in order travel, weather, smalltalk.
pub fn keyword_intent(message: &str) -> Intent {
    let tokens = tokenize(message);
    let has_any = |keywords: &[&str]| tokens.iter().any(|token| keywords.contains(&token.as_str()));

    if has_any(TRAVEL_KEYWORDS) {
        Intent::Travel
    } else if has_any(WEATHER_KEYWORDS) {
        Intent::Weather
    } else if has_any(SMALLTALK_KEYWORDS) {
        Intent::Smalltalk
    } else {
        Intent::Other
    }
}

pub fn is_restart(message: &str) -> bool {
    let tokens = tokenize(message);
    RESTART_PHRASES.iter().any(|phrase| {
        tokens.windows(phrase.len()).any(|window| {
            window.iter().zip(phrase.iter()).all(|(token, word)| token == word)
        })
    })
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '\'' {
            sanitized.extend(character.to_lowercase());
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parley_core::chrono::Utc;
    use parley_core::domain::conversation::{ConversationState, ConversationTurn, SessionId};
    use parley_core::domain::intent::Intent;
    use parley_core::domain::schema::{SlotName, SlotValue};

    use super::{is_restart, keyword_intent, IntentRouter, RouteSource};
    use crate::llm::{Classification, IntentClassifier};

    enum Behaviour {
        Answer(Intent, f32),
        Fail,
        Hang,
    }

    struct FakeClassifier(Behaviour);

    #[async_trait]
    impl IntentClassifier for FakeClassifier {
        async fn classify(&self, _: &[ConversationTurn], _: &str) -> Result<Classification> {
            match self.0 {
                Behaviour::Answer(intent, confidence) => {
                    Ok(Classification { intent, confidence, reasoning: None })
                }
                Behaviour::Fail => Err(anyhow!("provider returned 503")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(anyhow!("unreachable"))
                }
            }
        }
    }

    fn router(behaviour: Behaviour) -> IntentRouter {
        IntentRouter::new(Some(Arc::new(FakeClassifier(behaviour))), Duration::from_millis(50), 0.5)
    }

    fn state() -> ConversationState {
        ConversationState::new(SessionId::from("s-1"), Utc::now())
    }

    #[test]
    fn keywords_match_whole_words_in_priority_order() {
        let cases = [
            ("Book a flight to Paris", Intent::Travel),
            ("will it rain in Oslo", Intent::Weather),
            ("fly somewhere sunny", Intent::Travel),
            ("hello!", Intent::Smalltalk),
            ("this is unbookable", Intent::Other),
            ("What's the weather like?", Intent::Weather),
            ("chilly thoughts", Intent::Other),
        ];
        for (message, expected) in cases {
            assert_eq!(keyword_intent(message), expected, "message: {message}");
        }
    }

    #[test]
    fn restart_phrases_are_recognised() {
        assert!(is_restart("Let's start over"));
        assert!(is_restart("never mind"));
        assert!(is_restart("CANCEL"));
        assert!(!is_restart("cancellation policy"));
        assert!(!is_restart("start the trip over there"));
    }

    #[tokio::test]
    async fn confident_classifier_wins() {
        let decision =
            router(Behaviour::Answer(Intent::Weather, 0.9)).route(&state(), "is it nice out").await;
        assert_eq!(decision.intent, Intent::Weather);
        assert_eq!(decision.source, RouteSource::Classifier);
        assert!(decision.degraded.is_none());
    }

    #[tokio::test]
    async fn low_confidence_error_and_timeout_fall_back_to_keywords() {
        for behaviour in [Behaviour::Answer(Intent::Other, 0.2), Behaviour::Fail, Behaviour::Hang] {
            let decision = router(behaviour).route(&state(), "any flights to Rome").await;
            assert_eq!(decision.intent, Intent::Travel);
            assert_eq!(decision.source, RouteSource::Fallback);
            assert!(decision.degraded.is_some());
        }
    }

    #[tokio::test]
    async fn missing_classifier_is_reported_as_degraded() {
        let decision = IntentRouter::keyword_only().route(&state(), "hey").await;
        assert_eq!(decision.intent, Intent::Smalltalk);
        assert_eq!(decision.degraded.as_deref(), Some("classifier not configured"));
    }

    #[tokio::test]
    async fn slot_filling_sessions_keep_their_intent() {
        let mut state = state();
        state.switch_intent(Intent::Travel);
        state.accept_slot(SlotName::PaxAdults, SlotValue::Count(2)).expect("pax");

        let decision = router(Behaviour::Answer(Intent::Other, 0.99)).route(&state, "Lisbon").await;
        assert_eq!(decision.intent, Intent::Travel);
        assert_eq!(decision.source, RouteSource::Sticky);

        let decision = router(Behaviour::Answer(Intent::Weather, 0.99))
            .route(&state, "actually, what's the weather in Lisbon?")
            .await;
        assert_eq!(decision.intent, Intent::Weather);
        assert_eq!(decision.source, RouteSource::Classifier);

        let decision = router(Behaviour::Answer(Intent::Smalltalk, 0.99))
            .route(&state, "never mind")
            .await;
        assert!(decision.restart);
        assert_eq!(decision.intent, Intent::Smalltalk);
    }

    #[tokio::test]
    async fn greetings_break_a_pending_slot_question() {
        let mut state = state();
        state.switch_intent(Intent::Weather);

        let decision = IntentRouter::keyword_only().route(&state, "thanks").await;
        assert_eq!(decision.intent, Intent::Smalltalk);
        assert_eq!(decision.source, RouteSource::Fallback);

        let decision = IntentRouter::keyword_only().route(&state, "Toronto").await;
        assert_eq!(decision.intent, Intent::Weather);
        assert_eq!(decision.source, RouteSource::Sticky);
    }

    #[tokio::test]
    async fn unroutable_labels_and_nan_confidence_fall_back_to_keywords() {
        for behaviour in
            [Behaviour::Answer(Intent::Unset, 0.99), Behaviour::Answer(Intent::Weather, f32::NAN)]
        {
            let decision = router(behaviour).route(&state(), "weather in Toronto").await;
            assert_eq!(decision.intent, Intent::Weather);
            assert_eq!(decision.source, RouteSource::Fallback);
            assert!(decision.degraded.is_some());
        }
    }
}
