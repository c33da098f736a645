use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parley_agent::LlmClient;
use parley_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for OpenAI and for servers that mimic its API (Ollama's `/v1`).
pub struct OpenAiCompatibleClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    /// `None` when the provider is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, reqwest::Error> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (LlmProvider::Disabled, _) => return Ok(None),
            (_, Some(base_url)) => base_url,
            (LlmProvider::OpenAi, None) => OPENAI_BASE_URL,
            (LlmProvider::Ollama, None) => return Ok(None),
        };

        let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Some(Self::new(http, base_url, &config.model, config.api_key.clone())))
    }

    pub fn new(http: Client, base_url: &str, model: &str, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [Message { role: "user", content: prompt }],
            temperature: 0.0,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .context("completion request failed")?
            .error_for_status()
            .context("completion endpoint returned an error status")?;
        let completion: CompletionResponse =
            response.json().await.context("completion response was not valid JSON")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response had no message content"))
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use parley_agent::LlmClient;
    use parley_core::config::{AppConfig, LlmProvider};
    use reqwest::Client;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::OpenAiCompatibleClient;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{address}/v1")
    }

    #[test]
    fn disabled_provider_builds_no_client() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, LlmProvider::Disabled);
        assert!(OpenAiCompatibleClient::from_config(&config.llm).expect("build").is_none());
    }

    #[test]
    fn openai_provider_defaults_to_the_public_endpoint() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::OpenAi;
        let client =
            OpenAiCompatibleClient::from_config(&config.llm).expect("build").expect("client");
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn completion_returns_first_choice_and_sends_bearer_token() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    == Some("Bearer sk-test");
                let content = if authorized && body["model"] == "tiny" {
                    r#"{"intent":"WEATHER","confidence":0.9}"#
                } else {
                    "unauthorized"
                };
                Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
            }),
        );
        let base_url = serve(router).await;

        let api_key = SecretString::from("sk-test".to_string());
        let client = OpenAiCompatibleClient::new(Client::new(), &base_url, "tiny", Some(api_key));
        let answer = client.complete("classify this").await.expect("completion");
        assert_eq!(answer, r#"{"intent":"WEATHER","confidence":0.9}"#);
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let router = Router::new()
            .route("/v1/chat/completions", post(|| async { Json(json!({"choices": []})) }));
        let base_url = serve(router).await;

        let client = OpenAiCompatibleClient::new(Client::new(), &base_url, "tiny", None);
        assert!(client.complete("classify this").await.is_err());
    }
}
