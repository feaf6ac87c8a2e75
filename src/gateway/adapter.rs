//! Request adapter: canonical prompt -> family-specific request body.

use serde::Serialize;

use super::error::InferenceError;
use super::family::ModelFamily;
use super::types::{AdaptedRequest, CanonicalPrompt, GenerationParams, Role, Turn};

// =============================================================================
// WIRE BODIES
// =============================================================================

#[derive(Serialize)]
struct CompletionBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_gen_len: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanBody<'a> {
    input_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_generation_config: Option<TitanConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesBody<'a> {
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    inference_config: Option<InferenceConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct ChatCompletionsBody<'a> {
    model: &'a str,
    messages: Vec<FlatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct FlatMessage {
    role: Role,
    content: String,
}

// =============================================================================
// ADAPT
// =============================================================================

/// Adapt a prompt for `model_id` with no sampling overrides.
pub fn adapt(prompt: &CanonicalPrompt, model_id: &str) -> Result<AdaptedRequest, InferenceError> {
    adapt_with(prompt, model_id, &GenerationParams::default())
}

/// Adapt a prompt for `model_id`, with the family detected from the id.
///
/// Fails only when the prompt has no turns. Missing text is adapted as an
/// empty string. Pure: identical inputs produce identical bytes.
pub fn adapt_with(
    prompt: &CanonicalPrompt,
    model_id: &str,
    params: &GenerationParams,
) -> Result<AdaptedRequest, InferenceError> {
    adapt_for(prompt, model_id, ModelFamily::from_model_id(model_id), params)
}

/// Adapt a prompt for an already resolved family. `model_id` is still
/// written into bodies that carry one.
pub fn adapt_for(
    prompt: &CanonicalPrompt,
    model_id: &str,
    family: ModelFamily,
    params: &GenerationParams,
) -> Result<AdaptedRequest, InferenceError> {
    if prompt.is_empty() {
        return Err(InferenceError::malformed_prompt("prompt has no turns"));
    }

    let body = match family {
        ModelFamily::Completion => {
            let flat = prompt.flattened_text();
            serde_json::to_vec(&CompletionBody {
                prompt: &flat,
                max_gen_len: params.max_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            })
        }
        ModelFamily::TitanText => {
            let flat = prompt.flattened_text();
            serde_json::to_vec(&TitanBody {
                input_text: &flat,
                text_generation_config: (!params.is_empty()).then(|| TitanConfig {
                    max_token_count: params.max_tokens,
                    temperature: params.temperature,
                    top_p: params.top_p,
                }),
            })
        }
        ModelFamily::Messages => serde_json::to_vec(&MessagesBody {
            messages: prompt.turns(),
            inference_config: (!params.is_empty()).then(|| InferenceConfig {
                max_tokens: params.max_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            }),
        }),
        ModelFamily::ChatCompletions => serde_json::to_vec(&ChatCompletionsBody {
            model: model_id,
            messages: prompt
                .turns()
                .iter()
                .map(|t| FlatMessage {
                    role: t.role,
                    content: t.joined_text(),
                })
                .collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        }),
    }
    .map_err(|e| InferenceError::malformed_prompt(format!("failed to serialize request: {e}")))?;

    Ok(AdaptedRequest::new(family, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::ContentPart;
    use serde_json::{json, Value};

    fn body_json(req: &AdaptedRequest) -> Value {
        serde_json::from_slice(req.body()).unwrap()
    }

    fn two_user_turns() -> CanonicalPrompt {
        CanonicalPrompt::new(vec![Turn::user("A"), Turn::user("B")])
    }

    #[test]
    fn llama3_flattens_turns_with_single_spaces() {
        let req = adapt(&two_user_turns(), "meta.llama3-8b-instruct-v1:0").unwrap();
        assert_eq!(req.family(), ModelFamily::Completion);
        assert_eq!(body_json(&req), json!({"prompt": "A B"}));
    }

    #[test]
    fn flattening_follows_turn_then_part_order() {
        let prompt = CanonicalPrompt::new(vec![
            Turn {
                role: Role::System,
                content: vec![ContentPart::text("s1"), ContentPart::text("s2")],
            },
            Turn {
                role: Role::User,
                content: vec![ContentPart::text("u1"), ContentPart::text("")],
            },
        ]);
        let req = adapt(&prompt, "meta.llama3-70b").unwrap();
        assert_eq!(body_json(&req)["prompt"], "s1 s2 u1 ");
    }

    #[test]
    fn zero_turns_is_malformed() {
        let err = adapt(&CanonicalPrompt::new(vec![]), "amazon.nova-micro-v1:0").unwrap_err();
        assert!(matches!(err, InferenceError::MalformedPrompt(_)));
    }

    #[test]
    fn messages_family_passes_turns_through() {
        let prompt = CanonicalPrompt::new(vec![Turn::system("be fair"), Turn::user("hi")]);
        let req = adapt(&prompt, "amazon.nova-micro-v1:0").unwrap();
        assert_eq!(req.family(), ModelFamily::Messages);
        assert_eq!(
            body_json(&req),
            json!({"messages": [
                {"role": "system", "content": [{"text": "be fair"}]},
                {"role": "user", "content": [{"text": "hi"}]}
            ]})
        );
    }

    #[test]
    fn bare_string_content_is_rewrapped() {
        let prompt = CanonicalPrompt::from_value(&json!({
            "messages": [{"role": "user", "content": "plain"}]
        }))
        .unwrap();
        let req = adapt(&prompt, "amazon.nova-lite-v1:0").unwrap();
        assert_eq!(
            body_json(&req)["messages"][0]["content"],
            json!([{"text": "plain"}])
        );
    }

    #[test]
    fn chat_completions_carries_model_and_string_content() {
        let prompt = CanonicalPrompt::new(vec![Turn::system("sys"), Turn::user("q")]);
        let params = GenerationParams::default().temperature(0.0);
        let req = adapt_with(&prompt, "gpt-4o-mini", &params).unwrap();
        assert_eq!(
            body_json(&req),
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "q"}
                ],
                "temperature": 0.0
            })
        );
    }

    #[test]
    fn resolved_family_wins_over_model_id() {
        let prompt = CanonicalPrompt::from_text("hi");
        for id in ["llama-3.1-70b-versatile", "meta.llama3-8b"] {
            let req = adapt_for(
                &prompt,
                id,
                ModelFamily::ChatCompletions,
                &GenerationParams::default(),
            )
            .unwrap();
            assert_eq!(req.family(), ModelFamily::ChatCompletions);
            assert_eq!(
                body_json(&req),
                json!({"model": id, "messages": [{"role": "user", "content": "hi"}]})
            );
        }
    }

    #[test]
    fn titan_emits_generation_config_only_when_set() {
        let prompt = CanonicalPrompt::from_text("x");
        let bare = adapt(&prompt, "amazon.titan-text-express-v1").unwrap();
        assert_eq!(body_json(&bare), json!({"inputText": "x"}));

        let params = GenerationParams::default().max_tokens(512);
        let tuned = adapt_with(&prompt, "amazon.titan-text-express-v1", &params).unwrap();
        assert_eq!(
            body_json(&tuned),
            json!({"inputText": "x", "textGenerationConfig": {"maxTokenCount": 512}})
        );
    }

    #[test]
    fn params_use_family_field_names() {
        let prompt = CanonicalPrompt::from_text("x");
        let params = GenerationParams::default().max_tokens(64).top_p(0.5);

        let llama = body_json(&adapt_with(&prompt, "meta.llama3-8b", &params).unwrap());
        assert_eq!(llama["max_gen_len"], 64);
        assert_eq!(llama["top_p"], 0.5);

        let nova = body_json(&adapt_with(&prompt, "amazon.nova-micro-v1:0", &params).unwrap());
        assert_eq!(nova["inferenceConfig"], json!({"maxTokens": 64, "topP": 0.5}));
    }

    #[test]
    fn adapting_twice_is_byte_identical() {
        let prompt = CanonicalPrompt::new(vec![Turn::system("s"), Turn::user("u")]);
        for model in ["meta.llama3-8b", "amazon.nova-micro-v1:0", "gpt-4o", "amazon.titan-text-lite-v1"] {
            let a = adapt(&prompt, model).unwrap();
            let b = adapt(&prompt, model).unwrap();
            assert_eq!(a.body(), b.body(), "{model}");
        }
    }
}
