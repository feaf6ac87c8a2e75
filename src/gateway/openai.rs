//! OpenAI chat-completions transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use super::backend::Backend;
use super::error::{describe_chain, ErrorContext, InferenceError};
use super::family::ModelFamily;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum accepted reply size (1 MiB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

const NAME: &str = "openai";

/// Chat-completions backend. Every request is shaped for the
/// chat-completions family regardless of the model id, so any model served
/// behind an OpenAI-compatible endpoint works. The body is forwarded as-is.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiBackend {
    /// Create from API key with the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, InferenceError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| InferenceError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| InferenceError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

fn transport_error(err: reqwest::Error) -> InferenceError {
    InferenceError::backend(NAME, describe_chain(&err))
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn family_override(&self) -> Option<ModelFamily> {
        Some(ModelFamily::ChatCompletions)
    }

    async fn send(&self, _model_id: &str, body: Vec<u8>) -> Result<Vec<u8>, InferenceError> {
        let mut response = self
            .client
            .post(self.chat_url())
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(InferenceError::backend(
                    NAME,
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        if status.is_success() {
            return Ok(bytes);
        }

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match &request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        let parsed = serde_json::from_slice::<ErrorEnvelope>(&bytes)
            .ok()
            .and_then(|e| e.error);
        let (message, ctx) = match parsed {
            Some(error) => {
                let message = error
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
                let ctx = match error.code {
                    Some(code) => ctx.with_code(code),
                    None => ctx,
                };
                (message, ctx)
            }
            None => (format!("HTTP {}", status.as_u16()), ctx),
        };

        Err(InferenceError::backend_with_context(NAME, message, ctx))
    }
}
