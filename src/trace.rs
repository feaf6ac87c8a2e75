//! Per-item trace capture for batch runs.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::gateway::ModelFamily;

/// Which batch stage produced a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStage {
    Generate,
    Evaluate,
    Trigger,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemTrace {
    pub timestamp_ms: i64,
    pub stage: TraceStage,
    pub item_index: usize,
    /// Prompt file name or object key.
    pub item_id: String,
    pub backend: String,
    pub model: String,
    pub family: String,
    pub ok: bool,
    /// Set when the item was skipped rather than attempted.
    pub skipped: bool,
    pub latency_ms: u64,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

impl ItemTrace {
    /// Successful trace with required fields, defaulting others.
    pub fn new(
        stage: TraceStage,
        item_index: usize,
        item_id: impl Into<String>,
        backend: &str,
        model: &str,
    ) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            stage,
            item_index,
            item_id: item_id.into(),
            backend: backend.to_string(),
            model: model.to_string(),
            family: ModelFamily::from_model_id(model).to_string(),
            ok: true,
            skipped: false,
            latency_ms: 0,
            error_code: None,
            error: None,
        }
    }

    /// Record the family the gateway actually adapted for, when it differs
    /// from the one detected from the model id.
    pub fn family(mut self, family: ModelFamily) -> Self {
        self.family = family.to_string();
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.ok = false;
        self.error_code = Some(code.into());
        self.error = Some(message.into());
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skipped = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: ItemTrace) -> Result<(), TraceError>;
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<ItemTrace>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain. All senders must be dropped first.
    pub fn join(mut self) -> Result<(), TraceError> {
        let handle = self.handle.take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ItemTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: ItemTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<ItemTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
