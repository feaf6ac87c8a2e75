//! Model family detection.
//!
//! A family fixes both the request schema the adapter emits and the reply
//! shape a backend is expected to return. Detection is a short list of
//! exact identifiers followed by one ordered prefix table, shared by every
//! caller: first match wins, and identifiers that match nothing fall back
//! to [`ModelFamily::Messages`], the most general schema.
//!
//! A backend that speaks a single schema (the OpenAI transport) overrides
//! detection through [`Backend::family_override`](super::Backend::family_override).

use serde::Serialize;

/// Request/response schema family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Nested chat turns: `{"messages": [{"role", "content": [{"text"}]}]}`.
    /// Amazon Nova and similar.
    Messages,
    /// Single flattened prompt string: `{"prompt": "..."}`. Llama 3.
    Completion,
    /// Single flattened `inputText` with `textGenerationConfig`. Titan Text.
    TitanText,
    /// OpenAI chat completions: `model` plus string-content messages.
    ChatCompletions,
}

/// Bare identifiers that only match exactly.
pub const EXACT_IDS: &[(&str, ModelFamily)] = &[
    ("o1", ModelFamily::ChatCompletions),
    ("o3", ModelFamily::ChatCompletions),
    ("o4", ModelFamily::ChatCompletions),
];

/// Ordered prefix rules. First match wins.
pub const FAMILY_RULES: &[(&str, ModelFamily)] = &[
    ("meta.llama3", ModelFamily::Completion),
    ("amazon.titan-text", ModelFamily::TitanText),
    ("gpt-", ModelFamily::ChatCompletions),
    ("ft:gpt-", ModelFamily::ChatCompletions),
    ("chatgpt-", ModelFamily::ChatCompletions),
    ("o1-", ModelFamily::ChatCompletions),
    ("o3-", ModelFamily::ChatCompletions),
    ("o4-", ModelFamily::ChatCompletions),
];

impl ModelFamily {
    /// Family for a model identifier. Total: every string maps to a family.
    pub fn from_model_id(model_id: &str) -> Self {
        EXACT_IDS
            .iter()
            .find(|(id, _)| model_id == *id)
            .or_else(|| {
                FAMILY_RULES
                    .iter()
                    .find(|(prefix, _)| model_id.starts_with(prefix))
            })
            .map(|(_, family)| *family)
            .unwrap_or(ModelFamily::Messages)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Messages => "messages",
            ModelFamily::Completion => "completion",
            ModelFamily::TitanText => "titan_text",
            ModelFamily::ChatCompletions => "chat_completions",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_identifiers_route_to_expected_family() {
        let cases = [
            ("meta.llama3-8b-instruct-v1:0", ModelFamily::Completion),
            ("meta.llama3-1-70b-instruct-v1:0", ModelFamily::Completion),
            ("amazon.titan-text-express-v1", ModelFamily::TitanText),
            ("amazon.nova-micro-v1:0", ModelFamily::Messages),
            ("amazon.nova-pro-v1:0", ModelFamily::Messages),
            ("anthropic.claude-3-haiku-20240307-v1:0", ModelFamily::Messages),
            ("gpt-4o-mini", ModelFamily::ChatCompletions),
            ("ft:gpt-4o-mini:org::abc", ModelFamily::ChatCompletions),
            ("chatgpt-4o-latest", ModelFamily::ChatCompletions),
            ("o1", ModelFamily::ChatCompletions),
            ("o1-mini", ModelFamily::ChatCompletions),
            ("o3", ModelFamily::ChatCompletions),
            ("o3-mini-2025-01-31", ModelFamily::ChatCompletions),
            ("o4", ModelFamily::ChatCompletions),
            ("o4-mini", ModelFamily::ChatCompletions),
        ];
        for (id, family) in cases {
            assert_eq!(ModelFamily::from_model_id(id), family, "{id}");
        }
    }

    #[test]
    fn unmatched_and_empty_fall_back_to_messages() {
        assert_eq!(ModelFamily::from_model_id(""), ModelFamily::Messages);
        assert_eq!(ModelFamily::from_model_id("meta.llama2-13b"), ModelFamily::Messages);
        assert_eq!(ModelFamily::from_model_id("my-custom-model"), ModelFamily::Messages);
        // prefix match is case sensitive
        assert_eq!(ModelFamily::from_model_id("GPT-4o"), ModelFamily::Messages);
    }

    #[test]
    fn bare_o_series_ids_match_only_exactly() {
        for id in ["o1x-custom", "o3labs/model", "o1custom", "o4mini"] {
            assert_eq!(ModelFamily::from_model_id(id), ModelFamily::Messages, "{id}");
        }
    }

    #[test]
    fn every_rule_is_reachable() {
        // An earlier prefix must never shadow a later one entirely.
        for (i, (prefix, family)) in FAMILY_RULES.iter().enumerate() {
            assert_eq!(
                ModelFamily::from_model_id(prefix),
                *family,
                "rule {i} ({prefix}) is shadowed"
            );
        }
    }

    #[test]
    fn detection_is_deterministic() {
        for id in ["meta.llama3-x", "gpt-4o", "whatever"] {
            assert_eq!(ModelFamily::from_model_id(id), ModelFamily::from_model_id(id));
        }
    }
}
