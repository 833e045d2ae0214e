//! Minimal content-oracle API client.
//!
//! This crate provides a focused client for the generative-text service
//! that powers Fabula's turn resolution. It speaks the common
//! chat-completions wire format and exposes exactly what the engine
//! needs:
//! - Role-based model routing (`logic` for strict JSON decisions,
//!   `creative` for prose)
//! - Optional JSON response-format enforcement
//! - Bounded request timeouts (a hung call is an error, never a stall)
//! - A running token meter for per-turn accounting

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LOGIC_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CREATIVE_MODEL: &str = "gpt-4o";

/// Errors that can occur when calling the oracle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Which model tier a request should be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Strict, low-temperature decision making (validation, interpretation).
    Logic,
    /// Prose generation.
    Creative,
}

/// Requested response encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Per-request generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature (provider default when `None`).
    pub temperature: Option<f32>,
    /// Response encoding to request.
    pub response_format: ResponseFormat,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            response_format: ResponseFormat::Text,
            max_tokens: 2048,
        }
    }
}

impl GenerateOptions {
    /// Low-temperature JSON options, the common case for logic calls.
    pub fn strict_json() -> Self {
        Self {
            temperature: Some(0.1),
            response_format: ResponseFormat::Json,
            max_tokens: 2048,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Request JSON output.
    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    /// The generated text.
    pub text: String,
    /// Why generation stopped (`stop`, `length`, ...).
    pub finish_reason: String,
}

/// Content-oracle API client.
#[derive(Clone)]
pub struct Oracle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    logic_model: String,
    creative_model: String,
    total_tokens: Arc<AtomicU64>,
}

impl Oracle {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            base_url: std::env::var("FABULA_ORACLE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            logic_model: std::env::var("FABULA_ORACLE_LOGIC_MODEL")
                .unwrap_or_else(|_| DEFAULT_LOGIC_MODEL.to_string()),
            creative_model: std::env::var("FABULA_ORACLE_CREATIVE_MODEL")
                .unwrap_or_else(|_| DEFAULT_CREATIVE_MODEL.to_string()),
            total_tokens: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a client from the `FABULA_ORACLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("FABULA_ORACLE_API_KEY").map_err(|_| Error::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Override the base URL (e.g. a local inference server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the models used for each role.
    pub fn with_models(
        mut self,
        logic_model: impl Into<String>,
        creative_model: impl Into<String>,
    ) -> Self {
        self.logic_model = logic_model.into();
        self.creative_model = creative_model.into();
        self
    }

    /// The model a role is currently routed to.
    pub fn model_for(&self, role: Role) -> &str {
        match role {
            Role::Logic => &self.logic_model,
            Role::Creative => &self.creative_model,
        }
    }

    /// Total tokens consumed across the lifetime of this client.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Send a generation request and return the full response.
    pub async fn generate(
        &self,
        prompt: &str,
        role: Role,
        options: GenerateOptions,
    ) -> Result<Generation, Error> {
        let request = ApiRequest {
            model: self.model_for(role).to_string(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: match options.response_format {
                ResponseFormat::Json => Some(ApiResponseFormat {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        if let Some(usage) = &api_response.usage {
            self.total_tokens
                .fetch_add(usage.total_tokens, Ordering::Relaxed);
        }

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("response contained no choices".to_string()))?;

        debug!(
            finish_reason = %choice.finish_reason.as_deref().unwrap_or("unknown"),
            "oracle generation complete"
        );

        Ok(Generation {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| Error::NoApiKey)?,
        );
        Ok(headers)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Serialize)]
struct ApiResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_routing() {
        let oracle = Oracle::new("test-key").with_models("small", "large");
        assert_eq!(oracle.model_for(Role::Logic), "small");
        assert_eq!(oracle.model_for(Role::Creative), "large");
    }

    #[test]
    fn test_options_builders() {
        let opts = GenerateOptions::strict_json();
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.response_format, ResponseFormat::Json);

        let opts = GenerateOptions::default().with_temperature(0.8).json();
        assert_eq!(opts.temperature, Some(0.8));
        assert_eq!(opts.response_format, ResponseFormat::Json);
    }

    #[test]
    fn test_request_serialization_omits_empty_fields() {
        let request = ApiRequest {
            model: "m".to_string(),
            messages: vec![],
            max_tokens: 100,
            temperature: None,
            response_format: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("response_format"));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "choices": [
                {"message": {"content": "hello"}, "finish_reason": "stop"}
            ],
            "usage": {"total_tokens": 42}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(parsed.usage.as_ref().unwrap().total_tokens, 42);
    }
}
