use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parley_core::domain::conversation::{ConversationTurn, Role};
use parley_core::domain::intent::Intent;
use serde::Deserialize;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub reasoning: Option<String>,
}

/// Picks one of the classifiable intents for a message.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        history: &[ConversationTurn],
        message: &str,
    ) -> Result<Classification>;
}

const CLASSIFIER_PROMPT: &str = "You route messages for an assistant that helps with travel and weather.
Classify the user's latest message into exactly one intent:
- TRAVEL: booking or planning flights, fares, airports, trips.
- WEATHER: forecasts, temperature, rain or snow for a place and date.
- SMALLTALK: greetings, thanks, chit-chat.
- OTHER: anything else.
Respond with JSON only: {\"intent\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}";

pub struct LlmIntentClassifier {
    client: Arc<dyn LlmClient>,
    context_turns: usize,
}

impl LlmIntentClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, context_turns: 6 }
    }

    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    fn prompt(&self, history: &[ConversationTurn], message: &str) -> String {
        let start = history.len().saturating_sub(self.context_turns);
        let mut prompt = String::from(CLASSIFIER_PROMPT);
        if start < history.len() {
            prompt.push_str("\n\nRecent conversation:\n");
            for turn in &history[start..] {
                let speaker = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                prompt.push_str(&format!("{speaker}: {}\n", turn.text));
            }
        }
        prompt.push_str(&format!("\nLatest message: {message}\n"));
        prompt
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(
        &self,
        history: &[ConversationTurn],
        message: &str,
    ) -> Result<Classification> {
        let raw = self.client.complete(&self.prompt(history, message)).await?;
        parse_classification(&raw)
    }
}

#[derive(Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Reads the model's JSON answer, tolerating prose or code fences around it.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let start = raw.find('{').ok_or_else(|| anyhow!("classifier reply has no JSON object"))?;
    let end = raw.rfind('}').ok_or_else(|| anyhow!("classifier reply has no JSON object"))?;
    if end < start {
        return Err(anyhow!("classifier reply has no JSON object"));
    }

    let parsed: RawClassification =
        serde_json::from_str(&raw[start..=end]).context("classifier reply is not valid JSON")?;
    let intent: Intent = parsed.intent.parse()?;
    if !Intent::CLASSIFIABLE.contains(&intent) {
        return Err(anyhow!("classifier returned non-classifiable intent {intent}"));
    }

    let confidence = parsed.confidence.unwrap_or(0.0);
    if !confidence.is_finite() {
        return Err(anyhow!("classifier returned a non-finite confidence"));
    }

    Ok(Classification {
        intent,
        confidence: confidence.clamp(0.0, 1.0),
        reasoning: parsed.reasoning.filter(|reason| !reason.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use parley_core::chrono::Utc;
    use parley_core::domain::conversation::ConversationTurn;
    use parley_core::domain::intent::Intent;

    use super::{parse_classification, IntentClassifier, LlmClient, LlmIntentClassifier};

    struct ScriptedLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn parses_fenced_json_and_clamps_confidence() {
        let parsed = parse_classification(
            "```json\n{\"intent\": \"weather\", \"confidence\": 1.4, \"reasoning\": \"forecast\"}\n```",
        )
        .expect("parse");
        assert_eq!(parsed.intent, Intent::Weather);
        assert_eq!(parsed.confidence, 1.0);
        assert_eq!(parsed.reasoning.as_deref(), Some("forecast"));
    }

    #[test]
    fn rejects_unknown_and_unset_labels() {
        assert!(parse_classification("{\"intent\": \"BOOKING\", \"confidence\": 0.9}").is_err());
        assert!(parse_classification("{\"intent\": \"UNSET\", \"confidence\": 0.9}").is_err());
        assert!(parse_classification("no json here").is_err());
    }

    #[tokio::test]
    async fn prompt_includes_recent_history_and_latest_message() {
        let llm = Arc::new(ScriptedLlm {
            reply: "{\"intent\": \"TRAVEL\", \"confidence\": 0.8}".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let classifier = LlmIntentClassifier::new(llm.clone()).with_context_turns(1);
        let history = vec![
            ConversationTurn::user("hello there", Utc::now()),
            ConversationTurn::assistant("Where are you flying to?", Utc::now()),
        ];

        let result = classifier.classify(&history, "Lisbon please").await.expect("classify");
        assert_eq!(result.intent, Intent::Travel);

        let prompts = llm.prompts.lock().expect("prompts").clone();
        assert!(prompts[0].contains("assistant: Where are you flying to?"));
        assert!(!prompts[0].contains("hello there"));
        assert!(prompts[0].contains("Latest message: Lisbon please"));
    }
}
