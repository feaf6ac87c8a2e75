//! Backend invoker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::InferenceError;
use super::family::ModelFamily;
use super::types::{AdaptedRequest, RawReply};

/// Transport to a hosted model. Implementations hold only client
/// configuration, so one handle can serve concurrent calls.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs and errors ("openai", "bedrock").
    fn name(&self) -> &'static str;

    /// Family every request to this backend must use, whatever the model
    /// id. `None` means detect from the id.
    fn family_override(&self) -> Option<ModelFamily> {
        None
    }

    /// Send one request body and return the reply body.
    ///
    /// Transport failures must surface as
    /// [`InferenceError::BackendInvocation`].
    async fn send(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>, InferenceError>;
}

/// Perform exactly one backend call. No retry.
pub async fn invoke(
    request: AdaptedRequest,
    model_id: &str,
    backend: &dyn Backend,
) -> Result<RawReply, InferenceError> {
    let start = Instant::now();
    let family = request.family();
    let result = backend.send(model_id, request.into_body()).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(bytes) => {
            debug!(
                backend = backend.name(),
                model = model_id,
                family = %family,
                latency_ms,
                reply_bytes = bytes.len(),
                "backend call succeeded"
            );
            Ok(RawReply::Bytes(bytes))
        }
        Err(err) => {
            warn!(
                backend = backend.name(),
                model = model_id,
                latency_ms,
                code = err.code(),
                "backend call failed: {err}"
            );
            Err(err)
        }
    }
}

/// [`invoke`] bounded by a caller-level timeout. Expiry is reported as a
/// backend invocation failure.
pub async fn invoke_with_timeout(
    request: AdaptedRequest,
    model_id: &str,
    backend: &dyn Backend,
    timeout: Duration,
) -> Result<RawReply, InferenceError> {
    match tokio::time::timeout(timeout, invoke(request, model_id, backend)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(backend = backend.name(), model = model_id, ?timeout, "backend call timed out");
            Err(InferenceError::backend_timeout(backend.name(), timeout))
        }
    }
}
