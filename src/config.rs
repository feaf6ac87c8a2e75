//! Run configuration.
//!
//! Built once at startup and passed by reference. Every option is read from
//! the environment (the binary loads `.env` first); CLI flags override
//! individual fields afterwards. Configuration problems are fatal and are
//! reported before any item is processed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{
    openai, Backend, BedrockBackend, Gateway, GenerationParams, InferenceError, OpenAiBackend,
    DEFAULT_INVOKE_TIMEOUT,
};

pub const DEFAULT_MODEL_ID: &str = "amazon.nova-micro-v1:0";
pub const DEFAULT_OPENAI_JUDGE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BEDROCK_JUDGE_MODEL: &str = "amazon.nova-micro-v1:0";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_OUTPUT_BUCKET: &str = "llm-bias-pipeline-outputs";
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Which transport a model is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Bedrock,
    OpenAi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Bedrock => "bedrock",
            BackendKind::OpenAi => "openai",
        }
    }
}

impl FromStr for BackendKind {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bedrock" => Ok(BackendKind::Bedrock),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(InferenceError::config(format!("unknown backend: {other:?}"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Transport for the model under test.
    pub backend_kind: BackendKind,
    /// Model under test; selects family and routing.
    pub model_id: String,
    /// Transport for the judge model.
    pub judge_backend_kind: BackendKind,
    /// Judge model identifier.
    pub judge_model_id: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub aws_region: String,
    /// Bucket that storage-triggered runs write replies into.
    pub output_bucket: String,
    pub invoke_timeout: Duration,
    /// Worker count for batch runs.
    pub concurrency: usize,
    /// Sampling overrides for the model under test. The judge ignores
    /// these and samples at temperature 0.
    pub generation: GenerationParams,
}

/// Parse an optional numeric variable. Unparseable values are configuration
/// errors.
fn parse_var<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, InferenceError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| InferenceError::config(format!("{key} is not a number: {v:?}")))
        })
        .transpose()
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, InferenceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, InferenceError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_kind = match get("BACKEND") {
            Some(v) => v.parse()?,
            None => BackendKind::Bedrock,
        };
        let judge_backend_kind = match get("JUDGE_PROVIDER") {
            Some(v) => v.parse()?,
            None => BackendKind::OpenAi,
        };

        let judge_model_id = get("JUDGE_MODEL").unwrap_or_else(|| match judge_backend_kind {
            BackendKind::OpenAi => {
                get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_JUDGE_MODEL.to_string())
            }
            BackendKind::Bedrock => {
                get("BEDROCK_MODEL").unwrap_or_else(|| DEFAULT_BEDROCK_JUDGE_MODEL.to_string())
            }
        });

        let invoke_timeout = parse_var("INVOKE_TIMEOUT_SECONDS", get("INVOKE_TIMEOUT_SECONDS"))?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INVOKE_TIMEOUT);
        let concurrency = parse_var("BATCH_CONCURRENCY", get("BATCH_CONCURRENCY"))?
            .unwrap_or(DEFAULT_CONCURRENCY);

        let generation = GenerationParams {
            max_tokens: parse_var("MAX_TOKENS", get("MAX_TOKENS"))?,
            temperature: parse_var("TEMPERATURE", get("TEMPERATURE"))?,
            top_p: parse_var("TOP_P", get("TOP_P"))?,
        };

        Ok(Self {
            backend_kind,
            model_id: get("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            judge_backend_kind,
            judge_model_id,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            aws_region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            output_bucket: get("OUTPUT_BUCKET")
                .unwrap_or_else(|| DEFAULT_OUTPUT_BUCKET.to_string()),
            invoke_timeout,
            concurrency,
            generation,
        })
    }

    /// Check that the credentials `kind` needs are present.
    pub fn require(&self, kind: BackendKind) -> Result<(), InferenceError> {
        if kind == BackendKind::OpenAi && self.openai_api_key.is_none() {
            return Err(InferenceError::config("OPENAI_API_KEY not set"));
        }
        if self.concurrency == 0 {
            return Err(InferenceError::config("concurrency must be >= 1"));
        }
        Ok(())
    }

    /// Construct the transport for `kind`.
    pub async fn backend(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, InferenceError> {
        self.require(kind)?;
        Ok(match kind {
            BackendKind::OpenAi => {
                let key = self.openai_api_key.clone().unwrap_or_default();
                Arc::new(OpenAiBackend::with_config(
                    key,
                    &self.openai_base_url,
                    self.invoke_timeout,
                )?)
            }
            BackendKind::Bedrock => Arc::new(BedrockBackend::from_region(&self.aws_region).await?),
        })
    }

    /// Gateway for the model under test, carrying the sampling overrides.
    pub async fn model_gateway(&self) -> Result<Gateway, InferenceError> {
        let backend = self.backend(self.backend_kind).await?;
        Ok(Gateway::new(backend)
            .with_params(self.generation)
            .with_timeout(self.invoke_timeout))
    }

    /// Gateway for the judge model.
    pub async fn judge_gateway(&self) -> Result<Gateway, InferenceError> {
        let backend = self.backend(self.judge_backend_kind).await?;
        Ok(Gateway::new(backend).with_timeout(self.invoke_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, InferenceError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let c = config(&[]).unwrap();
        assert_eq!(c.backend_kind, BackendKind::Bedrock);
        assert_eq!(c.model_id, DEFAULT_MODEL_ID);
        assert_eq!(c.judge_backend_kind, BackendKind::OpenAi);
        assert_eq!(c.judge_model_id, DEFAULT_OPENAI_JUDGE_MODEL);
        assert_eq!(c.output_bucket, DEFAULT_OUTPUT_BUCKET);
        assert_eq!(c.invoke_timeout, DEFAULT_INVOKE_TIMEOUT);
        assert_eq!(c.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn judge_model_follows_provider() {
        let c = config(&[("JUDGE_PROVIDER", "bedrock"), ("BEDROCK_MODEL", "meta.llama3-8b")])
            .unwrap();
        assert_eq!(c.judge_model_id, "meta.llama3-8b");

        let c = config(&[("JUDGE_MODEL", "gpt-4o"), ("OPENAI_MODEL", "ignored")]).unwrap();
        assert_eq!(c.judge_model_id, "gpt-4o");
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let err = config(&[("BACKEND", "vertex")]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("vertex"));
    }

    #[test]
    fn openai_requires_key() {
        let c = config(&[]).unwrap();
        assert!(matches!(
            c.require(BackendKind::OpenAi),
            Err(InferenceError::Config(_))
        ));
        assert!(c.require(BackendKind::Bedrock).is_ok());

        let c = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert!(c.require(BackendKind::OpenAi).is_ok());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("INVOKE_TIMEOUT_SECONDS", "soon")]).is_err());
        assert!(config(&[("BATCH_CONCURRENCY", "-1")]).is_err());
        assert!(config(&[("MAX_TOKENS", "-5")]).is_err());
        let err = config(&[("TEMPERATURE", "warm")]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("TEMPERATURE"));
    }

    #[test]
    fn sampling_overrides_are_read() {
        assert!(config(&[]).unwrap().generation.is_empty());

        let c = config(&[("MAX_TOKENS", "512"), ("TEMPERATURE", "0.7"), ("TOP_P", " 0.9 ")])
            .unwrap();
        assert_eq!(c.generation.max_tokens, Some(512));
        assert_eq!(c.generation.temperature, Some(0.7));
        assert_eq!(c.generation.top_p, Some(0.9));
    }

    #[tokio::test]
    async fn sampling_overrides_reach_model_gateway_only() {
        let c = config(&[
            ("BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MAX_TOKENS", "256"),
            ("TEMPERATURE", "0.5"),
        ])
        .unwrap();

        let model = c.model_gateway().await.unwrap();
        assert_eq!(model.params().max_tokens, Some(256));
        assert_eq!(model.params().temperature, Some(0.5));

        let judge = c.judge_gateway().await.unwrap();
        assert!(judge.params().is_empty());
    }
}
