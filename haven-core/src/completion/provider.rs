//! OpenAI-compatible chat completions client (NVIDIA integrate API by default).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::wire::CompletionEnvelope;
use super::{CompletionBackend, CompletionError, CompletionRequest};
use crate::config::CompletionConfig;
use crate::models::ChatMessage;

/// Runtime provider settings. The API key is resolved from the environment
/// once, when the config is built.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl ProviderConfig {
    pub fn from_completion(config: &CompletionConfig) -> Self {
        Self {
            api_key: config.api_key(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout_seconds: config.request_timeout_seconds,
        }
    }
}

// ============================================================================
// Provider API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: Option<String>,
}

// ============================================================================
// ProviderClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl ProviderClient {
    /// Build a client. A missing API key is not an error here: the client is
    /// still constructed and every call fails with `MissingApiKey`, so the
    /// service can start and report a configuration error per request.
    pub fn new(config: ProviderConfig) -> Result<Self, CompletionError> {
        let base_url = config.base_url.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: ProviderConfig, base_url: String) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey)?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionBody {
            model: &self.config.model,
            messages: request.messages(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
        };

        tracing::debug!(
            mode = ?request.mode,
            history = request.history.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorResponse>(&text)
                .ok()
                .and_then(|e| e.error)
                .and_then(|e| e.message)
                .unwrap_or(text);

            tracing::error!(code = status.as_u16(), message = %message, "Completion provider error");

            return Err(CompletionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let envelope: CompletionEnvelope = serde_json::from_str(&text)?;
        envelope.into_reply()
    }
}

#[async_trait]
impl CompletionBackend for ProviderClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        let result = self.complete_once(request).await;
        if let Err(e) = &result {
            tracing::warn!(mode = ?request.mode, kind = ?e.kind(), error = %e, "Completion failed");
        }
        result
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionProfile, FailureKind};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.map(str::to_string),
            base_url: "http://unused.invalid".to_string(),
            model: "meta/llama-3.3-70b-instruct".to_string(),
            timeout_seconds: 5,
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    fn question_request() -> CompletionRequest {
        CompletionProfile::default().question(vec![], "Someone followed me near the station")
    }

    #[tokio::test]
    async fn test_question_request_shape_and_reply() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("nvapi-test")), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer nvapi-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "meta/llama-3.3-70b-instruct",
                "temperature": 0.7,
                "top_p": 0.7,
                "max_tokens": 1024
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                "I'm sorry that happened. When did this take place?",
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&question_request()).await.unwrap();
        assert_eq!(
            reply,
            ChatMessage::assistant("I'm sorry that happened. When did this take place?")
        );
    }

    #[tokio::test]
    async fn test_messages_include_system_history_and_user_turn() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), mock_server.uri()).unwrap();

        let transcript = vec![
            ChatMessage::user("It was last night"),
            ChatMessage::assistant("Where did it happen?"),
        ];
        let request = CompletionProfile::default().summary(transcript);

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "temperature": 0.3,
                "messages": [
                    { "role": "system", "content": crate::completion::prompts::SUMMARY_PROMPT },
                    { "role": "user", "content": "It was last night" },
                    { "role": "assistant", "content": "Where did it happen?" },
                    { "role": "user", "content": crate::completion::prompts::SUMMARY_INSTRUCTION }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Incident Report: ...")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&request).await.unwrap();
        assert_eq!(reply.content, "Incident Report: ...");
    }

    #[tokio::test]
    async fn test_missing_api_key_never_calls_provider() {
        let mock_server = MockServer::start().await;
        let client = ProviderClient::with_base_url(test_config(None), mock_server.uri()).unwrap();
        assert!(!client.has_api_key());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("x")))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = client.complete(&question_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::MissingApiKey));
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[tokio::test]
    async fn test_provider_500_is_transport_error() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "upstream overloaded" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.complete(&question_request()).await.unwrap_err();
        match &err {
            CompletionError::Api { code, message } => {
                assert_eq!(*code, 500);
                assert_eq!(message, "upstream overloaded");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
        assert_eq!(err.kind(), FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_kept_verbatim() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&mock_server)
            .await;

        match client.complete(&question_request()).await {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let err = client.complete(&question_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::NoChoices));
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let mock_server = MockServer::start().await;
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&mock_server)
            .await;

        let err = client.complete(&question_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Decode(_)));
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client =
            ProviderClient::with_base_url(test_config(Some("k")), "http://127.0.0.1:9".to_string())
                .unwrap();

        let err = client.complete(&question_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Http(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ProviderClient::with_base_url(
            test_config(Some("k")),
            "https://integrate.api.nvidia.com/v1/".to_string(),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://integrate.api.nvidia.com/v1");
        assert_eq!(client.name(), "openai-compatible");
    }
}
