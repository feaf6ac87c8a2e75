//! Batch drivers: generate replies for a prompt directory, then judge them.
//!
//! Layout on disk:
//! - `prompts_json/prompt_N.json`: one canonical prompt per file
//! - `outputs/prompt_N-output.json`: raw backend reply for that prompt
//!
//! Items run concurrently through `buffered`, so results come back in input
//! order whatever order the calls finish in. Per-item failures are recorded
//! on the item; only setup failures (unreadable prompt directory, unwritable
//! output directory) abort a batch.
//!
//! Usage:
//! ```bash
//! bias generate --model amazon.nova-micro-v1:0
//! bias evaluate --provider openai --model gpt-4o-mini
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gateway::{extract, CanonicalOutput, CanonicalPrompt, Gateway, InferenceError, RawReply};
use crate::judge::{Judge, JudgeVerdict};
use crate::trace::{ItemTrace, TraceSink, TraceStage};

// =============================================================================
// Types
// =============================================================================

pub const DEFAULT_PROMPTS_DIR: &str = "prompts_json";
pub const DEFAULT_OUTPUTS_DIR: &str = "outputs";

/// Where prompts are read from and replies are written to.
#[derive(Debug, Clone)]
pub struct BatchLayout {
    pub prompts_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

impl Default for BatchLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPTS_DIR, DEFAULT_OUTPUTS_DIR)
    }
}

impl BatchLayout {
    pub fn new(prompts_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            outputs_dir: outputs_dir.into(),
        }
    }

    /// Reply path paired with a prompt file.
    pub fn output_path(&self, prompt_path: &Path) -> PathBuf {
        self.outputs_dir
            .join(output_file_name(&file_name(prompt_path)))
    }
}

/// `prompt_3.json` -> `prompt_3-output.json`.
pub fn output_file_name(prompt_file_name: &str) -> String {
    match prompt_file_name.strip_suffix(".json") {
        Some(stem) => format!("{stem}-output.json"),
        None => format!("{prompt_file_name}-output"),
    }
}

/// Results file for a judge provider/model pair. `:` and `/` in the model
/// id become `_`.
pub fn results_file_name(provider: &str, model: &str) -> String {
    let safe_model = if model.is_empty() {
        "default".to_string()
    } else {
        model.replace([':', '/'], "_")
    };
    format!("bias_eval_results_{provider}_{safe_model}.json")
}

/// Knobs shared by both drivers.
#[derive(Clone)]
pub struct BatchOptions {
    /// Items in flight at once.
    pub concurrency: usize,
    /// Only the first N prompt files (sorted by name).
    pub limit: Option<usize>,
    pub trace: Option<Arc<dyn TraceSink>>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            limit: None,
            trace: None,
        }
    }
}

impl BatchOptions {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    fn emit(&self, event: ItemTrace) {
        if let Some(sink) = &self.trace {
            if let Err(e) = sink.record(event) {
                warn!("failed to record trace: {e}");
            }
        }
    }
}

/// One evaluated item, as persisted in the results file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub prompt: String,
    pub response: String,
    pub category: String,
}

/// Outcome of generating one reply.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationItem {
    pub prompt_file: String,
    pub output_file: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub model: String,
    pub items: Vec<GenerationItem>,
}

impl GenerationSummary {
    pub fn written(&self) -> usize {
        self.items.iter().filter(|i| i.output_file.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_some()).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BatchError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> BatchError + '_ {
        move |source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BatchError::Io { .. } => "io_error",
            BatchError::Inference(e) => e.code(),
            BatchError::Json(_) => "json_error",
        }
    }
}

// =============================================================================
// Prompt discovery
// =============================================================================

/// `*.json` files in `dir`, sorted by name, truncated to `limit`.
pub async fn list_prompt_files(dir: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>, BatchError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(BatchError::io(dir))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(BatchError::io(dir))? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    Ok(files)
}

async fn read_prompt(path: &Path) -> Result<CanonicalPrompt, BatchError> {
    let bytes = tokio::fs::read(path).await.map_err(BatchError::io(path))?;
    Ok(CanonicalPrompt::from_slice(&bytes)?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// =============================================================================
// Generate phase
// =============================================================================

/// Run every prompt file through `gateway` and store each raw reply next to
/// its prompt's name in the outputs directory.
pub async fn generate_outputs(
    gateway: &Gateway,
    model_id: &str,
    layout: &BatchLayout,
    options: &BatchOptions,
) -> Result<GenerationSummary, BatchError> {
    let files = list_prompt_files(&layout.prompts_dir, options.limit).await?;
    tokio::fs::create_dir_all(&layout.outputs_dir)
        .await
        .map_err(BatchError::io(&layout.outputs_dir))?;

    info!(
        model = model_id,
        backend = gateway.backend_name(),
        items = files.len(),
        "generating replies"
    );

    let tasks = files
        .iter()
        .enumerate()
        .map(|(index, path)| generate_item(gateway, model_id, layout, options, index, path));

    let items: Vec<GenerationItem> = stream::iter(tasks)
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let summary = GenerationSummary {
        model: model_id.to_string(),
        items,
    };
    info!(
        written = summary.written(),
        failed = summary.failed(),
        "generation finished"
    );
    Ok(summary)
}

async fn generate_item(
    gateway: &Gateway,
    model_id: &str,
    layout: &BatchLayout,
    options: &BatchOptions,
    index: usize,
    prompt_path: &Path,
) -> GenerationItem {
    let start = Instant::now();
    let prompt_file = file_name(prompt_path);
    let output_path = layout.output_path(prompt_path);

    let result = async {
        let prompt = read_prompt(prompt_path).await?;
        let reply = gateway.complete_raw(&prompt, model_id).await?;
        tokio::fs::write(&output_path, reply.into_bytes())
            .await
            .map_err(BatchError::io(&output_path))?;
        Ok::<(), BatchError>(())
    }
    .await;

    let trace = ItemTrace::new(
        TraceStage::Generate,
        index,
        &prompt_file,
        gateway.backend_name(),
        model_id,
    )
    .family(gateway.family_for(model_id))
    .latency(start.elapsed().as_millis() as u64);

    match result {
        Ok(()) => {
            debug!(prompt = %prompt_file, output = %output_path.display(), "reply written");
            options.emit(trace);
            GenerationItem {
                prompt_file,
                output_file: Some(output_path.display().to_string()),
                error: None,
            }
        }
        Err(err) => {
            warn!(prompt = %prompt_file, code = err.code(), "generation failed: {err}");
            options.emit(trace.error(err.code(), err.to_string()));
            GenerationItem {
                prompt_file,
                output_file: None,
                error: Some(err.to_string()),
            }
        }
    }
}

// =============================================================================
// Evaluate phase
// =============================================================================

/// Judge every prompt that has a stored reply.
///
/// Prompts without a reply file, or whose reply has no extractable text,
/// are skipped. Any other per-item failure is kept as a record whose
/// category is `ERROR: <diagnostic>`.
pub async fn evaluate_outputs(
    judge: &Judge,
    layout: &BatchLayout,
    options: &BatchOptions,
) -> Result<Vec<EvalRecord>, BatchError> {
    let files = list_prompt_files(&layout.prompts_dir, options.limit).await?;

    info!(
        judge = judge.model_id(),
        backend = judge.backend_name(),
        items = files.len(),
        "evaluating outputs"
    );

    let tasks = files
        .iter()
        .enumerate()
        .map(|(index, path)| evaluate_item(judge, layout, options, index, path));

    let records: Vec<EvalRecord> = stream::iter(tasks)
        .buffered(options.concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    info!(records = records.len(), "evaluation finished");
    Ok(records)
}

async fn evaluate_item(
    judge: &Judge,
    layout: &BatchLayout,
    options: &BatchOptions,
    index: usize,
    prompt_path: &Path,
) -> Option<EvalRecord> {
    let start = Instant::now();
    let prompt_file = file_name(prompt_path);
    let output_path = layout.output_path(prompt_path);
    let trace = ItemTrace::new(
        TraceStage::Evaluate,
        index,
        &prompt_file,
        judge.backend_name(),
        judge.model_id(),
    )
    .family(judge.family());

    let reply = match tokio::fs::read(&output_path).await {
        Ok(bytes) => RawReply::Bytes(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(prompt = %prompt_file, "no reply file, skipping");
            options.emit(trace.skipped());
            return None;
        }
        Err(source) => {
            let err = BatchError::Io {
                path: output_path,
                source,
            };
            options.emit(trace.error(err.code(), err.to_string()));
            return Some(error_record(String::new(), &err));
        }
    };

    let prompt = match read_prompt(prompt_path).await {
        Ok(p) => p,
        Err(err) => {
            warn!(prompt = %prompt_file, "unreadable prompt: {err}");
            options.emit(trace.error(err.code(), err.to_string()));
            return Some(error_record(String::new(), &err));
        }
    };
    let prompt_text = prompt.primary_text().to_string();

    // The reply was produced by the model under test; extraction does not
    // depend on which model that was.
    let output = match extract(&reply, judge.model_id()) {
        Ok(output @ CanonicalOutput::Text(_)) => output,
        Ok(CanonicalOutput::Unextractable) => {
            debug!(prompt = %prompt_file, "reply has no extractable text, skipping");
            options.emit(trace.skipped());
            return None;
        }
        Err(err) => {
            warn!(prompt = %prompt_file, "undecodable reply: {err}");
            options.emit(trace.error(err.code(), err.to_string()));
            return Some(error_record(prompt_text, &BatchError::from(err)));
        }
    };

    let verdict = judge.classify(&prompt, &output).await;
    let trace = trace.latency(start.elapsed().as_millis() as u64);
    match &verdict {
        JudgeVerdict::Error(e) => options.emit(trace.error("judge_error", e.as_str())),
        JudgeVerdict::Label(_) => options.emit(trace),
    }

    Some(EvalRecord {
        prompt: prompt_text,
        response: output.as_text().unwrap_or_default().to_string(),
        category: verdict.to_string(),
    })
}

fn error_record(prompt: String, err: &BatchError) -> EvalRecord {
    let message = JudgeVerdict::Error(err.to_string()).to_string();
    EvalRecord {
        prompt,
        response: message.clone(),
        category: message,
    }
}

/// Persist results as one pretty-printed JSON array.
pub async fn write_results(path: &Path, records: &[EvalRecord]) -> Result<(), BatchError> {
    let body = serde_json::to_vec_pretty(records)?;
    tokio::fs::write(path, body).await.map_err(BatchError::io(path))
}
