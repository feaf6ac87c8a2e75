#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bias_harness::gateway::{Backend, CanonicalPrompt, InferenceError, ModelFamily};
use serde_json::{json, Value};

type Responder = dyn Fn(&str, &Value) -> Result<Value, InferenceError> + Send + Sync;
type Delay = dyn Fn(&Value) -> Duration + Send + Sync;

/// In-process backend answering from a closure over the decoded request
/// body.
pub struct FakeBackend {
    name: &'static str,
    respond: Box<Responder>,
    delay: Option<Box<Delay>>,
    family: Option<ModelFamily>,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

impl FakeBackend {
    pub fn new(
        name: &'static str,
        respond: impl Fn(&str, &Value) -> Result<Value, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            respond: Box::new(respond),
            delay: None,
            family: None,
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(&Value) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Force every request to one family, like a single-schema transport.
    pub fn with_family(mut self, family: ModelFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn family_override(&self) -> Option<ModelFamily> {
        self.family
    }

    async fn send(&self, model_id: &str, body: Vec<u8>) -> Result<Vec<u8>, InferenceError> {
        let value: Value = serde_json::from_slice(&body).unwrap();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(value.clone());
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&value)).await;
        }
        let reply = (self.respond)(model_id, &value)?;
        Ok(serde_json::to_vec(&reply).unwrap())
    }
}

/// Bedrock converse-style reply.
pub fn nova_reply(text: &str) -> Value {
    json!({
        "output": {"message": {"role": "assistant", "content": [{"text": text}]}},
        "stopReason": "end_turn"
    })
}

/// Chat-completions reply.
pub fn chat_reply(text: &str) -> Value {
    json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
    })
}

/// First text of a messages-family request body.
pub fn messages_text(body: &Value) -> String {
    body["messages"][0]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// User content of a chat-completions request body.
pub fn chat_user_text(body: &Value) -> String {
    body["messages"]
        .as_array()
        .and_then(|m| m.iter().find(|t| t["role"] == "user"))
        .and_then(|t| t["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

/// Write `prompt_{i}.json` for each text.
pub fn write_prompts(dir: &Path, texts: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    for (i, text) in texts.iter().enumerate() {
        let prompt = CanonicalPrompt::from_text(*text);
        std::fs::write(
            dir.join(format!("prompt_{i}.json")),
            serde_json::to_vec_pretty(&prompt).unwrap(),
        )
        .unwrap();
    }
}
