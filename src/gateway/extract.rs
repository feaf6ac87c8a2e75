//! Response extractor: raw reply -> canonical output text.
//!
//! Replies are matched against a fixed, ordered list of known shapes. Each
//! matcher is a pure lookup that yields `None` on any missing key, wrong
//! type, or empty text, which moves on to the next shape. When nothing
//! matches the result is [`CanonicalOutput::Unextractable`], a valid output
//! that callers filter rather than fail on.

use serde_json::Value;
use tracing::debug;

use super::error::InferenceError;
use super::types::{CanonicalOutput, RawReply};

/// A named reply shape.
pub struct ShapeMatcher {
    pub name: &'static str,
    pub matches: fn(&Value) -> Option<String>,
}

/// Known reply shapes, tried in order.
pub const SHAPE_MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher {
        name: "nested_chat",
        matches: nested_chat,
    },
    ShapeMatcher {
        name: "flat_generation",
        matches: flat_generation,
    },
    ShapeMatcher {
        name: "chat_completions",
        matches: chat_completions,
    },
    ShapeMatcher {
        name: "titan_results",
        matches: titan_results,
    },
];

/// `output.message.content[0].text`
fn nested_chat(reply: &Value) -> Option<String> {
    non_empty(
        reply
            .get("output")?
            .get("message")?
            .get("content")?
            .get(0)?
            .get("text")?,
    )
}

/// `generation`
fn flat_generation(reply: &Value) -> Option<String> {
    non_empty(reply.get("generation")?)
}

/// `choices[0].message.content`
fn chat_completions(reply: &Value) -> Option<String> {
    non_empty(
        reply
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?,
    )
}

/// `results[0].outputText`
fn titan_results(reply: &Value) -> Option<String> {
    non_empty(reply.get("results")?.get(0)?.get("outputText")?)
}

fn non_empty(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// First matching shape and the text it found.
fn first_match(reply: &Value) -> Option<(&'static str, String)> {
    SHAPE_MATCHERS
        .iter()
        .find_map(|m| (m.matches)(reply).map(|text| (m.name, text)))
}

/// Run the matcher list over already-decoded JSON.
pub fn extract_value(reply: &Value) -> CanonicalOutput {
    first_match(reply)
        .map(|(_, text)| CanonicalOutput::Text(text))
        .unwrap_or(CanonicalOutput::Unextractable)
}

/// Extract the canonical output from a raw reply.
///
/// Errors only with [`InferenceError::ReplyDecode`] when the bytes are not
/// UTF-8 JSON; missing keys are never an error.
pub fn extract(raw: &RawReply, model_id: &str) -> Result<CanonicalOutput, InferenceError> {
    let value = raw.to_json()?;
    match first_match(&value) {
        Some((shape, text)) => {
            debug!(model = model_id, shape, "reply shape matched");
            Ok(CanonicalOutput::Text(text))
        }
        None => {
            debug!(model = model_id, "no known reply shape matched");
            Ok(CanonicalOutput::Unextractable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> CanonicalOutput {
        CanonicalOutput::Text(s.to_string())
    }

    #[test]
    fn known_shapes_round_trip() {
        let nested = RawReply::Bytes(
            br#"{"output":{"message":{"content":[{"text":"hello"}]}}}"#.to_vec(),
        );
        assert_eq!(extract(&nested, "amazon.nova-micro-v1:0").unwrap(), text("hello"));

        let flat = RawReply::Json(json!({"generation": "hi there"}));
        assert_eq!(extract(&flat, "meta.llama3-8b").unwrap(), text("hi there"));

        let empty = RawReply::Json(json!({}));
        assert_eq!(
            extract(&empty, "amazon.nova-micro-v1:0").unwrap(),
            CanonicalOutput::Unextractable
        );
    }

    #[test]
    fn openai_and_titan_shapes() {
        let chat = json!({"choices": [{"message": {"content": "NEUTRAL"}}]});
        assert_eq!(extract_value(&chat), text("NEUTRAL"));

        let titan = json!({"results": [{"outputText": "ok", "tokenCount": 1}]});
        assert_eq!(extract_value(&titan), text("ok"));
    }

    #[test]
    fn partial_nesting_falls_through() {
        let cases = [
            json!({"output": null}),
            json!({"output": {"message": {}}}),
            json!({"output": {"message": {"content": []}}}),
            json!({"output": {"message": {"content": [{"image": "x"}]}}}),
            json!({"output": {"message": {"content": [{"text": 42}]}}}),
            json!({"output": "flat string"}),
            json!({"generation": null}),
            json!({"choices": []}),
            json!([1, 2, 3]),
            json!("bare"),
            json!(null),
        ];
        for case in cases {
            assert_eq!(extract_value(&case), CanonicalOutput::Unextractable, "{case}");
        }
    }

    #[test]
    fn empty_nested_text_falls_back_to_generation() {
        let reply = json!({
            "output": {"message": {"content": [{"text": ""}]}},
            "generation": "fallback"
        });
        assert_eq!(extract_value(&reply), text("fallback"));
        assert_eq!(first_match(&reply).map(|(shape, _)| shape), Some("flat_generation"));
    }

    #[test]
    fn nested_shape_wins_over_generation() {
        let reply = json!({
            "output": {"message": {"content": [{"text": "first"}]}},
            "generation": "second"
        });
        assert_eq!(extract_value(&reply), text("first"));
    }

    #[test]
    fn undecodable_bytes_are_decode_errors() {
        let err = extract(&RawReply::Bytes(b"<html>502</html>".to_vec()), "m").unwrap_err();
        assert!(matches!(err, InferenceError::ReplyDecode(_)));
    }

    #[test]
    fn extraction_is_idempotent() {
        let raw = RawReply::Bytes(br#"{"generation":"same"}"#.to_vec());
        assert_eq!(extract(&raw, "m").unwrap(), extract(&raw, "m").unwrap());
    }
}
