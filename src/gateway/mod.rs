//! Multi-backend inference gateway.
//!
//! The chain is adapt -> invoke -> extract:
//! - [`adapter`] shapes a [`CanonicalPrompt`] for the model family the
//!   backend forces, or else the one picked by [`ModelFamily::from_model_id`],
//! - [`backend`] sends the bytes through a [`Backend`] handle,
//! - [`extract`] pulls the canonical text back out of whichever reply shape
//!   came back.

pub mod adapter;
pub mod backend;
pub mod bedrock;
pub mod error;
pub mod extract;
pub mod family;
pub mod openai;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use adapter::{adapt, adapt_for, adapt_with};
pub use backend::{invoke, invoke_with_timeout, Backend};
pub use bedrock::BedrockBackend;
pub use error::{ErrorContext, InferenceError};
pub use extract::{extract, extract_value};
pub use family::ModelFamily;
pub use openai::OpenAiBackend;
pub use types::*;

/// Default caller-level timeout around one backend call.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(120);

/// A backend handle plus per-call settings, reusable across concurrent
/// items.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
    params: GenerationParams,
    timeout: Duration,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            params: GenerationParams::default(),
            timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Family the adapter will use for `model_id` on this backend.
    pub fn family_for(&self, model_id: &str) -> ModelFamily {
        self.backend
            .family_override()
            .unwrap_or_else(|| ModelFamily::from_model_id(model_id))
    }

    /// Adapt and invoke, returning the verbatim reply.
    pub async fn complete_raw(
        &self,
        prompt: &CanonicalPrompt,
        model_id: &str,
    ) -> Result<RawReply, InferenceError> {
        let family = self.family_for(model_id);
        let request = adapt_for(prompt, model_id, family, &self.params)?;
        invoke_with_timeout(request, model_id, self.backend.as_ref(), self.timeout).await
    }

    /// Full chain: adapt, invoke, extract.
    pub async fn complete(
        &self,
        prompt: &CanonicalPrompt,
        model_id: &str,
    ) -> Result<CanonicalOutput, InferenceError> {
        let raw = self.complete_raw(prompt, model_id).await?;
        extract(&raw, model_id)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("backend", &self.backend.name())
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .finish()
    }
}
