//! Error types for the inference gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from backend failures for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// HTTP status code from the backend.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from the backend (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors raised along the adapt -> invoke -> extract chain.
///
/// An unextractable reply is not an error; see
/// [`CanonicalOutput::Unextractable`](super::types::CanonicalOutput).
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The prompt cannot be adapted (no turns, unparseable input).
    #[error("malformed prompt: {0}")]
    MalformedPrompt(String),

    /// Transport, network or timeout failure while calling a backend.
    #[error("{backend} invocation failed: {message}")]
    BackendInvocation {
        backend: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Reply bytes are not UTF-8 JSON at all.
    #[error("reply decode error: {0}")]
    ReplyDecode(String),

    /// Missing credential, unknown backend name, bad client setup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl InferenceError {
    pub fn malformed_prompt(message: impl Into<String>) -> Self {
        Self::MalformedPrompt(message.into())
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendInvocation {
            backend,
            message: message.into(),
            context: None,
        }
    }

    pub fn backend_with_context(
        backend: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::BackendInvocation {
            backend,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Timeout expiry around a backend call.
    pub fn backend_timeout(backend: &'static str, after: Duration) -> Self {
        Self::backend(backend, format!("timed out after {after:?}"))
    }

    pub fn reply_decode(message: impl Into<String>) -> Self {
        Self::ReplyDecode(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short error code for logs and traces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPrompt(_) => "malformed_prompt",
            Self::BackendInvocation { .. } => "backend_invocation",
            Self::ReplyDecode(_) => "reply_decode",
            Self::Config(_) => "config_error",
        }
    }

    /// Configuration errors abort a run; everything else is per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::BackendInvocation { context, .. } => context.as_ref(),
            _ => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

/// Render an error and its source chain as `outer: inner: root`.
///
/// Transport errors (reqwest, the AWS SDK) keep the interesting cause, such
/// as "Connection refused", several levels down.
pub fn describe_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn describe_chain_includes_root_cause() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        ));
        assert_eq!(describe_chain(&err), "outer: Connection refused");
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(InferenceError::config("OPENAI_API_KEY not set").is_fatal());
        assert!(!InferenceError::backend("openai", "boom").is_fatal());
        assert!(!InferenceError::malformed_prompt("no turns").is_fatal());
        assert!(!InferenceError::reply_decode("bad json").is_fatal());
    }

    #[test]
    fn timeout_maps_to_backend_invocation() {
        let err = InferenceError::backend_timeout("bedrock", Duration::from_secs(3));
        assert_eq!(err.code(), "backend_invocation");
        assert!(err.to_string().contains("timed out after 3s"));
    }
}
