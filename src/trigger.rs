//! Storage-event trigger.
//!
//! Handles object-created notifications of the S3 shape:
//! `{"Records": [{"s3": {"bucket": {"name": ..}, "object": {"key": ..}}}]}`.
//! Each referenced object is read as a prompt, run through the gateway, and
//! the raw reply is written to the output bucket under the sibling key
//! `name-output.json`. An event without `Records` is a direct invocation:
//! the event itself is the prompt and the decoded reply is returned.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::gateway::{CanonicalPrompt, Gateway, InferenceError};
use crate::trace::{ItemTrace, TraceSink, TraceStage};

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("object store error on {bucket}/{key}: {message}")]
    Store {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("invalid event: {0}")]
    Event(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl TriggerError {
    pub fn store(bucket: &str, key: &str, message: impl Into<String>) -> Self {
        Self::Store {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store_error",
            Self::Event(_) => "invalid_event",
            Self::Inference(e) => e.code(),
        }
    }
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Minimal bucket/key blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, TriggerError>;
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), TriggerError>;
}

/// Filesystem store: `root/bucket/key`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve to a path under the root. Absolute keys and `..` segments
    /// are rejected.
    pub fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf, TriggerError> {
        let relative = Path::new(bucket).join(key);
        let safe = !bucket.is_empty()
            && !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(TriggerError::store(bucket, key, "key escapes the store root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, TriggerError> {
        let path = self.path_for(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| TriggerError::store(bucket, key, e.to_string()))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), TriggerError> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TriggerError::store(bucket, key, e.to_string()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| TriggerError::store(bucket, key, e.to_string()))
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records")]
    pub records: Vec<StorageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub key: String,
}

/// Sibling key for a reply: every `.json` becomes `-output.json`; keys
/// without `.json` get `-output` appended.
pub fn output_key(key: &str) -> String {
    if key.contains(".json") {
        key.replace(".json", "-output.json")
    } else {
        format!("{key}-output")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Replies written for each record, in record order.
    Stored(Vec<StoredObject>),
    /// Direct invocation: the decoded reply.
    Direct(Value),
}

// =============================================================================
// HANDLER
// =============================================================================

pub struct TriggerHandler {
    gateway: Gateway,
    model_id: String,
    store: Arc<dyn ObjectStore>,
    output_bucket: String,
    trace: Option<Arc<dyn TraceSink>>,
}

impl TriggerHandler {
    pub fn new(
        gateway: Gateway,
        model_id: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        output_bucket: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            model_id: model_id.into(),
            store,
            output_bucket: output_bucket.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Handle one event. Any failure fails the whole event so the
    /// notification can be redelivered.
    pub async fn handle(&self, event: &Value) -> Result<TriggerOutcome, TriggerError> {
        if event.get("Records").is_none() {
            info!(model = %self.model_id, "direct invocation");
            return self.handle_direct(event).await.map(TriggerOutcome::Direct);
        }

        let event: StorageEvent = serde_json::from_value(event.clone())
            .map_err(|e| TriggerError::Event(e.to_string()))?;

        let mut stored = Vec::with_capacity(event.records.len());
        for (index, record) in event.records.iter().enumerate() {
            stored.push(self.handle_record(index, record).await?);
        }
        Ok(TriggerOutcome::Stored(stored))
    }

    async fn handle_direct(&self, event: &Value) -> Result<Value, TriggerError> {
        let prompt = CanonicalPrompt::from_value(event)?;
        let reply = self.gateway.complete_raw(&prompt, &self.model_id).await?;
        Ok(reply.to_json()?)
    }

    async fn handle_record(
        &self,
        index: usize,
        record: &StorageRecord,
    ) -> Result<StoredObject, TriggerError> {
        let start = Instant::now();
        let bucket = &record.s3.bucket.name;
        let key = &record.s3.object.key;
        info!(bucket = %bucket, key = %key, "processing object");

        let result = async {
            let body = self.store.get(bucket, key).await?;
            let prompt = CanonicalPrompt::from_slice(&body)?;
            let reply = self.gateway.complete_raw(&prompt, &self.model_id).await?;

            let out_key = output_key(key);
            self.store
                .put(&self.output_bucket, &out_key, reply.into_bytes())
                .await?;
            Ok::<StoredObject, TriggerError>(StoredObject {
                bucket: self.output_bucket.clone(),
                key: out_key,
            })
        }
        .await;

        if let Some(sink) = &self.trace {
            let trace = ItemTrace::new(
                TraceStage::Trigger,
                index,
                key,
                self.gateway.backend_name(),
                &self.model_id,
            )
            .family(self.gateway.family_for(&self.model_id))
            .latency(start.elapsed().as_millis() as u64);
            let trace = match &result {
                Ok(_) => trace,
                Err(e) => trace.error(e.code(), e.to_string()),
            };
            if let Err(e) = sink.record(trace) {
                tracing::warn!("failed to record trace: {e}");
            }
        }

        if let Ok(stored) = &result {
            info!(bucket = %stored.bucket, key = %stored.key, "reply saved");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_key_replaces_json_suffix() {
        assert_eq!(output_key("prompts/prompt_1.json"), "prompts/prompt_1-output.json");
        assert_eq!(output_key("raw.txt"), "raw.txt-output");
    }

    #[test]
    fn local_store_rejects_escaping_keys() {
        let store = LocalObjectStore::new("/tmp/store");
        assert!(store.path_for("bucket", "../etc/passwd").is_err());
        assert!(store.path_for("bucket", "/abs").is_err());
        assert!(store.path_for("", "k").is_err());
        assert_eq!(
            store.path_for("bucket", "a/b.json").unwrap(),
            PathBuf::from("/tmp/store/bucket/a/b.json")
        );
    }

    #[test]
    fn parses_s3_notification() {
        let event: StorageEvent = serde_json::from_value(serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {"bucket": {"name": "in"}, "object": {"key": "p.json", "size": 10}}
            }]
        }))
        .unwrap();
        assert_eq!(event.records[0].s3.bucket.name, "in");
        assert_eq!(event.records[0].s3.object.key, "p.json");
    }
}
