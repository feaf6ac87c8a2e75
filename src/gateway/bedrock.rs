//! Amazon Bedrock managed-inference transport.

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client;

use super::backend::Backend;
use super::error::InferenceError;

const NAME: &str = "bedrock";

/// `InvokeModel` backend. Credentials come from the default AWS provider
/// chain and are resolved once when the backend is built.
#[derive(Debug, Clone)]
pub struct BedrockBackend {
    client: Client,
}

impl BedrockBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Load shared AWS configuration for `region`.
    ///
    /// Fails with [`InferenceError::Config`] when the provider chain yields
    /// no credentials, so a run stops before its first item.
    pub async fn from_region(region: impl Into<String>) -> Result<Self, InferenceError> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.into()))
            .load()
            .await;

        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| InferenceError::config("no AWS credentials provider configured"))?;
        provider.provide_credentials().await.map_err(|e| {
            InferenceError::config(format!(
                "AWS credentials unavailable: {}",
                DisplayErrorContext(&e)
            ))
        })?;

        Ok(Self::new(Client::new(&sdk_config)))
    }
}

#[async_trait]
impl Backend for BedrockBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>, InferenceError> {
        let output = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| InferenceError::backend(NAME, DisplayErrorContext(&e).to_string()))?;

        Ok(output.body.into_inner())
    }
}
