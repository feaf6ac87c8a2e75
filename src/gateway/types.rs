//! Canonical, provider-neutral types for the inference gateway.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::InferenceError;
use super::family::ModelFamily;

// =============================================================================
// PROMPTS
// =============================================================================

/// Turn role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A text span inside a turn.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContentPart {
    pub text: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// All parts joined by single spaces.
    pub fn joined_text(&self) -> String {
        join_parts(self.content.iter())
    }
}

/// Provider-neutral prompt: an ordered list of turns.
///
/// Serializes to the `{"messages": [{"role", "content": [{"text"}]}]}` file
/// shape. Parsing is lenient: content may be a bare string, a missing role
/// means `user`, missing text is empty.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CanonicalPrompt {
    #[serde(rename = "messages")]
    turns: Vec<Turn>,
}

impl CanonicalPrompt {
    /// Build from turns. Zero turns is representable; the adapter rejects it.
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Wrap a raw dataset text field into a single user turn.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![Turn::user(text)])
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Text of the first part of the first turn, the form used in reports
    /// and judge instructions.
    pub fn primary_text(&self) -> &str {
        self.turns
            .first()
            .and_then(|t| t.content.first())
            .map(|p| p.text.as_str())
            .unwrap_or("")
    }

    /// All parts of all turns, turn order then part order, single-spaced.
    pub fn flattened_text(&self) -> String {
        join_parts(self.turns.iter().flat_map(|t| t.content.iter()))
    }

    /// Parse a prompt record.
    ///
    /// Accepted shapes: `{"messages": [...]}`, `{"prompt": "..."}`, a bare
    /// JSON string. Any other value becomes a single user turn holding its
    /// JSON text.
    pub fn from_value(value: &Value) -> Result<Self, InferenceError> {
        if let Some(messages) = value.get("messages") {
            let turns: Vec<WireTurn> = serde_json::from_value(messages.clone())
                .map_err(|e| InferenceError::malformed_prompt(format!("invalid messages: {e}")))?;
            return Ok(Self::new(turns.into_iter().map(Turn::from).collect()));
        }

        match value {
            Value::String(text) => Ok(Self::from_text(text.clone())),
            Value::Object(map) => match map.get("prompt") {
                Some(Value::String(text)) => Ok(Self::from_text(text.clone())),
                Some(other) => Ok(Self::from_text(other.to_string())),
                None => Ok(Self::from_text(value.to_string())),
            },
            other => Ok(Self::from_text(other.to_string())),
        }
    }

    /// Parse raw object bytes. Non-JSON UTF-8 is taken as plain prompt text.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InferenceError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::from_value(&value),
            Err(_) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    InferenceError::malformed_prompt(format!("prompt is not UTF-8: {e}"))
                })?;
                Ok(Self::from_text(text.trim()))
            }
        }
    }
}

impl<'de> Deserialize<'de> for CanonicalPrompt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn join_parts<'a>(parts: impl Iterator<Item = &'a ContentPart>) -> String {
    parts
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

// Lenient wire shapes for prompt files.

#[derive(Deserialize)]
struct WireTurn {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: WireContent,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
    #[default]
    Missing,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePart {
    Bare(String),
    Block {
        #[serde(default)]
        text: Option<Value>,
    },
}

impl From<WireTurn> for Turn {
    fn from(w: WireTurn) -> Self {
        let content = match w.content {
            WireContent::Text(text) => vec![ContentPart { text }],
            WireContent::Parts(parts) => parts
                .into_iter()
                .map(|p| match p {
                    WirePart::Bare(text) => ContentPart { text },
                    WirePart::Block { text } => ContentPart {
                        text: match text {
                            Some(Value::String(s)) => s,
                            Some(Value::Null) | None => String::new(),
                            Some(other) => other.to_string(),
                        },
                    },
                })
                .collect(),
            WireContent::Missing => Vec::new(),
        };
        Turn {
            role: w.role.unwrap_or(Role::User),
            content,
        }
    }
}

// =============================================================================
// GENERATION PARAMETERS
// =============================================================================

/// Optional sampling parameters, emitted only when set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl GenerationParams {
    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.max_tokens.is_none() && self.temperature.is_none() && self.top_p.is_none()
    }
}

// =============================================================================
// REQUESTS AND REPLIES
// =============================================================================

/// Serialized request body shaped for one model family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedRequest {
    family: ModelFamily,
    body: Vec<u8>,
}

impl AdaptedRequest {
    pub(crate) fn new(family: ModelFamily, body: Vec<u8>) -> Self {
        Self { family, body }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Verbatim backend reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    Bytes(Vec<u8>),
    Json(Value),
}

impl RawReply {
    /// Decode into JSON. Fails only when the bytes are not UTF-8 JSON.
    pub fn to_json(&self) -> Result<Value, InferenceError> {
        match self {
            RawReply::Json(v) => Ok(v.clone()),
            RawReply::Bytes(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| InferenceError::reply_decode(format!("not UTF-8: {e}")))?;
                serde_json::from_str(text)
                    .map_err(|e| InferenceError::reply_decode(format!("invalid JSON: {e}")))
            }
        }
    }

    /// Raw bytes as they would be persisted.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RawReply::Bytes(b) => b,
            RawReply::Json(v) => v.to_string().into_bytes(),
        }
    }
}

/// Extracted response text, or the unextractable marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalOutput {
    Text(String),
    Unextractable,
}

impl CanonicalOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CanonicalOutput::Text(t) => Some(t),
            CanonicalOutput::Unextractable => None,
        }
    }

    pub fn is_unextractable(&self) -> bool {
        matches!(self, CanonicalOutput::Unextractable)
    }
}
