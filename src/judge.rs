//! Bias judge: asks a secondary model to label a (prompt, output) pair.
//!
//! The judge's text is stored verbatim as the label. Nothing checks it
//! against [`BiasCategory`]; reports flag non-canonical labels instead.

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::gateway::{CanonicalOutput, CanonicalPrompt, Gateway, GenerationParams, ModelFamily};
use crate::prompts::{PromptTemplate, DEFAULT_TEMPLATE};

/// Diagnostic for a judge reply with no recognizable text.
pub const UNEXPECTED_FORMAT: &str = "Unexpected response format";

/// The closed label set the judge is instructed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiasCategory {
    Neutral,
    GenderBias,
    OtherBias,
}

impl BiasCategory {
    pub const ALL: [BiasCategory; 3] = [
        BiasCategory::Neutral,
        BiasCategory::GenderBias,
        BiasCategory::OtherBias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BiasCategory::Neutral => "NEUTRAL",
            BiasCategory::GenderBias => "GENDER_BIAS",
            BiasCategory::OtherBias => "OTHER_BIAS",
        }
    }

    /// Exact match on the canonical spelling.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl std::fmt::Display for BiasCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgeVerdict {
    /// Trimmed judge text, possibly outside the canonical set.
    Label(String),
    /// The call chain failed; carries the diagnostic.
    Error(String),
}

impl JudgeVerdict {
    pub fn is_error(&self) -> bool {
        matches!(self, JudgeVerdict::Error(_))
    }

    /// True when the label is exactly one of the canonical categories.
    pub fn is_canonical(&self) -> bool {
        self.category().is_some()
    }

    /// Canonical category, when the label is exactly one.
    pub fn category(&self) -> Option<BiasCategory> {
        match self {
            JudgeVerdict::Label(l) => BiasCategory::parse(l),
            JudgeVerdict::Error(_) => None,
        }
    }
}

/// Stored form: the label itself, or `ERROR: <diagnostic>`.
impl std::fmt::Display for JudgeVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgeVerdict::Label(l) => f.write_str(l),
            JudgeVerdict::Error(e) => write!(f, "ERROR: {e}"),
        }
    }
}

impl Serialize for JudgeVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Judge bound to a gateway and a judge model.
#[derive(Debug, Clone)]
pub struct Judge {
    gateway: Gateway,
    model_id: String,
    template: PromptTemplate,
}

impl Judge {
    /// The judge samples at temperature 0 unless the gateway already sets
    /// a temperature.
    pub fn new(gateway: Gateway, model_id: impl Into<String>) -> Self {
        let mut params: GenerationParams = *gateway.params();
        if params.temperature.is_none() {
            params.temperature = Some(0.0);
        }
        Self {
            gateway: gateway.with_params(params),
            model_id: model_id.into(),
            template: DEFAULT_TEMPLATE,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn backend_name(&self) -> &'static str {
        self.gateway.backend_name()
    }

    /// Family the judge requests are adapted for.
    pub fn family(&self) -> ModelFamily {
        self.gateway.family_for(&self.model_id)
    }

    /// Classify a model output. Never fails: chain errors become
    /// [`JudgeVerdict::Error`].
    pub async fn classify(&self, prompt: &CanonicalPrompt, output: &CanonicalOutput) -> JudgeVerdict {
        match output.as_text() {
            Some(text) => self.classify_text(prompt.primary_text(), text).await,
            None => JudgeVerdict::Error("no output text to classify".to_string()),
        }
    }

    /// Classify already-extracted prompt and response strings.
    pub async fn classify_text(&self, prompt: &str, response: &str) -> JudgeVerdict {
        let instruction = self.template.render(prompt, response).to_prompt();
        match self.gateway.complete(&instruction, &self.model_id).await {
            Ok(CanonicalOutput::Text(label)) => {
                let label = label.trim().to_string();
                if BiasCategory::parse(&label).is_none() {
                    debug!(model = %self.model_id, label = %label, "judge label outside canonical set");
                }
                JudgeVerdict::Label(label)
            }
            Ok(CanonicalOutput::Unextractable) => {
                warn!(model = %self.model_id, "judge reply had no recognizable text");
                JudgeVerdict::Error(UNEXPECTED_FORMAT.to_string())
            }
            Err(err) => {
                warn!(model = %self.model_id, code = err.code(), "judge call failed: {err}");
                JudgeVerdict::Error(err.to_string())
            }
        }
    }
}
