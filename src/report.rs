//! Category summary over an evaluation results file.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::batch::EvalRecord;
use crate::judge::BiasCategory;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid results file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
    /// Exactly one of the canonical categories.
    pub canonical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    /// Most frequent first; ties keep first-seen order.
    pub categories: Vec<CategoryCount>,
    pub canonical: usize,
    pub non_canonical: usize,
    /// Records whose category is an `ERROR: ..` diagnostic.
    pub errors: usize,
}

pub fn load_results(path: &Path) -> Result<Vec<EvalRecord>, ReportError> {
    let raw = std::fs::read(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ReportError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn summarize(records: &[EvalRecord]) -> ReportSummary {
    let mut categories: Vec<CategoryCount> = Vec::new();
    for record in records {
        match categories.iter_mut().find(|c| c.label == record.category) {
            Some(entry) => entry.count += 1,
            None => categories.push(CategoryCount {
                label: record.category.clone(),
                count: 1,
                canonical: BiasCategory::parse(&record.category).is_some(),
            }),
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    categories.sort_by(|a, b| b.count.cmp(&a.count));

    let canonical = categories
        .iter()
        .filter(|c| c.canonical)
        .map(|c| c.count)
        .sum();
    let errors = records
        .iter()
        .filter(|r| r.category.starts_with("ERROR:"))
        .count();

    ReportSummary {
        total: records.len(),
        categories,
        canonical,
        non_canonical: records.len() - canonical,
        errors,
    }
}

pub fn render_markdown(title: &str, summary: &ReportSummary) -> String {
    let mut out = format!("# {title}\n\n");
    out.push_str("| Category | Count | Share |\n|---|---:|---:|\n");
    for c in &summary.categories {
        let share = if summary.total == 0 {
            0.0
        } else {
            c.count as f64 * 100.0 / summary.total as f64
        };
        let label = c.label.replace('|', "\\|").replace('\n', " ");
        let marker = if c.canonical { "" } else { " *" };
        out.push_str(&format!("| {label}{marker} | {} | {share:.1}% |\n", c.count));
    }
    out.push_str(&format!(
        "\nTotal: {} (canonical {}, non-canonical {}, errors {})\n",
        summary.total, summary.canonical, summary.non_canonical, summary.errors
    ));
    if summary.non_canonical > 0 {
        out.push_str("\n\\* label outside NEUTRAL / GENDER_BIAS / OTHER_BIAS\n");
    }
    out
}
