//! Model listing and metadata for LLM providers.
//!
//! Parses the OpenRouter-style `/models` listing (id, name, context length,
//! per-token pricing, supported parameters) and offers lookup/filter helpers
//! used for cost estimation.

use crate::error::LlmError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-token prices in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt: f64,
    pub completion: f64,
}

/// Metadata about a single LLM model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// The model identifier (e.g., "openai/gpt-4o-mini").
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Context window size in tokens, if known.
    pub context_length: Option<usize>,
    pub pricing: ModelPricing,
    /// Request parameters the model accepts (e.g., "reasoning", "seed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_parameters: Option<Vec<String>>,
}

impl ModelInfo {
    /// Whether the model advertises support for a request parameter.
    ///
    /// Unknown capability lists are treated as permissive.
    pub fn supports(&self, parameter: &str) -> bool {
        self.supported_parameters
            .as_ref()
            .map(|params| params.iter().any(|p| p == parameter))
            .unwrap_or(true)
    }
}

/// Prices are strings in OpenRouter ("0.0000025") but numbers in some proxies.
fn price_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Parse a `/models` API response into a list of `ModelInfo`, sorted by id.
///
/// Expects a JSON body with a `"data"` array of model objects, each with at least an `"id"` field.
pub fn parse_models_response(body: &Value) -> Result<Vec<ModelInfo>, LlmError> {
    let data =
        body.get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'data' array in models response".to_string(),
            })?;

    let mut models: Vec<ModelInfo> = data
        .iter()
        .filter_map(|m| {
            let id = m.get("id")?.as_str()?.to_string();
            let name = m
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or(&id)
                .to_string();
            let context_length = m
                .get("context_length")
                .and_then(|c| c.as_u64())
                .map(|c| c as usize);
            let pricing = m.get("pricing");
            let supported_parameters = m
                .get("supported_parameters")
                .and_then(|p| p.as_array())
                .map(|params| {
                    params
                        .iter()
                        .filter_map(|p| p.as_str().map(str::to_string))
                        .collect()
                });
            Some(ModelInfo {
                id,
                name,
                context_length,
                pricing: ModelPricing {
                    prompt: price_value(pricing.and_then(|p| p.get("prompt"))),
                    completion: price_value(pricing.and_then(|p| p.get("completion"))),
                },
                supported_parameters,
            })
        })
        .collect();

    models.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(models)
}

/// Filter a list of models to include only chat/completion models.
///
/// Excludes embedding, whisper, tts, dall-e, and moderation models.
pub fn filter_chat_models(models: Vec<ModelInfo>) -> Vec<ModelInfo> {
    models
        .into_iter()
        .filter(|m| {
            let id = m.id.to_lowercase();
            !id.contains("embedding")
                && !id.contains("whisper")
                && !id.contains("tts")
                && !id.contains("dall-e")
                && !id.contains("moderation")
        })
        .collect()
}

/// Find a model by exact id.
pub fn find_model<'a>(models: &'a [ModelInfo], id: &str) -> Option<&'a ModelInfo> {
    models.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_models_response() {
        let body = json!({
            "data": [
                {
                    "id": "openai/gpt-4o-mini",
                    "name": "OpenAI: GPT-4o-mini",
                    "context_length": 128000,
                    "pricing": { "prompt": "0.00000015", "completion": "0.0000006" },
                    "supported_parameters": ["temperature", "seed"]
                },
                {
                    "id": "anthropic/claude-sonnet-4",
                    "pricing": { "prompt": 0.000003, "completion": 0.000015 }
                }
            ]
        });
        let models = parse_models_response(&body).unwrap();
        assert_eq!(models.len(), 2);
        // Sorted by id
        assert_eq!(models[0].id, "anthropic/claude-sonnet-4");
        assert_eq!(models[0].name, "anthropic/claude-sonnet-4");
        assert!((models[0].pricing.completion - 0.000015).abs() < 1e-12);
        assert!(models[0].supported_parameters.is_none());

        assert_eq!(models[1].context_length, Some(128_000));
        assert!((models[1].pricing.prompt - 0.00000015).abs() < 1e-15);
        assert!(models[1].supports("seed"));
        assert!(!models[1].supports("reasoning"));
    }

    #[test]
    fn test_parse_empty_models_response() {
        let models = parse_models_response(&json!({"data": []})).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn test_parse_missing_data_field() {
        let result = parse_models_response(&json!({"models": []}));
        assert!(matches!(result, Err(LlmError::ResponseParse { .. })));
    }

    #[test]
    fn test_filter_and_find() {
        let body = json!({
            "data": [
                { "id": "openai/text-embedding-3-small" },
                { "id": "openai/gpt-4o" }
            ]
        });
        let models = filter_chat_models(parse_models_response(&body).unwrap());
        assert_eq!(models.len(), 1);
        assert!(find_model(&models, "openai/gpt-4o").is_some());
        assert!(find_model(&models, "missing").is_none());
    }
}
