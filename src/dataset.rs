//! Dataset -> prompt file export.
//!
//! Reads a local dataset dump (JSON Lines, or one JSON array of row
//! objects), wraps each row's text field into a single-turn canonical
//! prompt, and writes `prompt_{row}.json` files for the batch drivers.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::gateway::CanonicalPrompt;

/// Text column in the CLEAR-Bias `base_prompts` config.
pub const DEFAULT_TEXT_FIELD: &str = "PROMPT";
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid dataset row at line {line}: {source}")]
    Row {
        line: usize,
        source: serde_json::Error,
    },
    #[error("dataset must be a JSON array or JSON lines of objects")]
    Shape,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub text_field: String,
    /// Stop after this many exported prompts. `0` exports all rows.
    pub limit: usize,
    /// Remove previous prompts and outputs before writing.
    pub clean: bool,
    pub prompts_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            limit: DEFAULT_LIMIT,
            clean: true,
            prompts_dir: PathBuf::from(crate::batch::DEFAULT_PROMPTS_DIR),
            outputs_dir: PathBuf::from(crate::batch::DEFAULT_OUTPUTS_DIR),
        }
    }
}

/// Parse a dataset file. A leading `[` means a JSON array; anything else
/// is read as JSON Lines with blank lines ignored.
pub fn load_rows(path: &Path) -> Result<Vec<Value>, DatasetError> {
    let raw = std::fs::read_to_string(path).map_err(io_err(path))?;

    if raw.trim_start().starts_with('[') {
        return match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(_) => Err(DatasetError::Shape),
            Err(source) => Err(DatasetError::Row { line: 1, source }),
        };
    }

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| DatasetError::Row { line: i + 1, source })
        })
        .collect()
}

/// Row text, if the row has the field. Non-string values keep their JSON
/// text.
pub fn row_text(row: &Value, text_field: &str) -> Option<String> {
    match row.get(text_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Export prompts and return the written paths, in row order.
///
/// File names carry the dataset row index, so skipped rows leave gaps.
pub fn export_prompts(dataset: &Path, options: &ExportOptions) -> Result<Vec<PathBuf>, DatasetError> {
    let rows = load_rows(dataset)?;
    info!(rows = rows.len(), dataset = %dataset.display(), "loaded dataset");

    if options.clean {
        for dir in [&options.prompts_dir, &options.outputs_dir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir).map_err(io_err(dir))?;
            }
        }
    }
    std::fs::create_dir_all(&options.prompts_dir).map_err(io_err(&options.prompts_dir))?;
    std::fs::create_dir_all(&options.outputs_dir).map_err(io_err(&options.outputs_dir))?;

    let mut written = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if options.limit > 0 && written.len() >= options.limit {
            break;
        }
        let Some(text) = row_text(row, &options.text_field) else {
            debug!(row = i, field = %options.text_field, "row has no text field, skipping");
            continue;
        };

        let prompt = CanonicalPrompt::from_text(text);
        let path = options.prompts_dir.join(format!("prompt_{i}.json"));
        let body = serde_json::to_vec_pretty(&prompt)
            .map_err(|source| DatasetError::Row { line: i + 1, source })?;
        std::fs::write(&path, body).map_err(io_err(&path))?;
        written.push(path);
    }

    info!(
        exported = written.len(),
        dir = %options.prompts_dir.display(),
        "exported prompts"
    );
    Ok(written)
}
