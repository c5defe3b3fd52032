//! LiteLLM-compatible chat completion client.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (OpenRouter,
//! a LiteLLM proxy, a local gateway). The client makes exactly one request
//! per call; retries are driven by the batch runner.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{transport_message, LlmError};

/// Default API base for OpenAI-compatible routing.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Default model used for document generation.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means the client's default model.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for LiteLLM-compatible APIs.
#[derive(Debug, Clone)]
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl LiteLlmClient {
    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::ClientBuild` if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::ClientBuild(e.to_string()))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Wire format of an OpenAI-compatible response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    // Some gateways send null content for filtered completions
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-2xx response to an error.
fn error_from_status(status_code: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status_code == 429 {
        LlmError::RateLimited(message)
    } else {
        LlmError::ApiError {
            code: status_code,
            message,
        }
    }
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let body = GenerationRequest {
            model: model.clone(),
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Title", "corpus-forge");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        tracing::debug!(model = %model, url = %url, "Sending chat completion request");

        let http_response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(transport_message(&e)))?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status.as_u16(), &error_text));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason,
            })
            .collect();

        Ok(GenerationResponse {
            id: api_response.id,
            model: if api_response.model.is_empty() {
                model
            } else {
                api_response.model
            },
            choices,
            usage: api_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = Message::user("Hello");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "Hello");
        assert_eq!(Message::assistant("Hi there!").role, "assistant");
    }

    #[test]
    fn test_generation_request_serialization() {
        let request = GenerationRequest::new("gemini-2.5-flash", vec![Message::user("test")])
            .with_temperature(0.7);

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"gemini-2.5-flash\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_generation_response_first_content() {
        let response = GenerationResponse {
            id: "test-id".to_string(),
            model: "gemini-2.5-flash".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("Hello!"),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        };
        assert_eq!(response.first_content(), Some("Hello!"));

        let empty = GenerationResponse {
            choices: vec![],
            ..response
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_client_new_trims_trailing_slash() {
        let client = LiteLlmClient::new(
            "http://localhost:4000/",
            Some("test-key".to_string()),
            "gemini-2.5-flash",
        )
        .expect("client builds");

        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.default_model(), "gemini-2.5-flash");
        assert!(client.has_api_key());
    }

    #[test]
    fn test_error_from_status() {
        let body = r#"{"error":{"message":"slow down","type":"rate_limit"}}"#;
        assert!(matches!(error_from_status(429, body), LlmError::RateLimited(m) if m == "slow down"));

        match error_from_status(503, "upstream unavailable") {
            LlmError::ApiError { code, message } => {
                assert_eq!(code, 503);
                assert_eq!(message, "upstream unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_response_tolerates_null_content() {
        let json = r#"{"id":"x","model":"m","choices":[{"index":0,"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(json).expect("parses");
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.choices[0].message.content.is_none());
        assert_eq!(parsed.usage, Usage::default());
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client =
            LiteLlmClient::new("http://127.0.0.1:65535", None, "gemini-2.5-flash").expect("client builds");

        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }
}
