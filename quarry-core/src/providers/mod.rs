//! LLM provider implementations.
//!
//! Every supported backend speaks the OpenAI chat completions wire format
//! (OpenRouter, OpenAI, Ollama, vLLM, LM Studio). Use `create_provider()` to
//! instantiate one from config.

pub mod models;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use std::sync::Arc;

pub use models::{ModelInfo, ModelPricing};
pub use openai_compat::OpenAiCompatibleProvider;

/// Providers that run locally and accept any bearer token.
const KEYLESS_PROVIDERS: &[&str] = &["ollama", "local", "lmstudio", "vllm"];

/// Resolve the API key for a provider: inline key first, then the environment variable.
///
/// Returns an `LlmError::AuthFailed` if neither source has a key.
pub fn resolve_api_key(config: &LlmConfig) -> Result<String, LlmError> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.clone());
    }
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ if KEYLESS_PROVIDERS.contains(&config.provider.as_str()) => Ok(String::new()),
        _ => Err(LlmError::AuthFailed {
            provider: format!(
                "{} (env var '{}' not set and no api_key configured)",
                config.provider, config.api_key_env
            ),
        }),
    }
}

/// Create an LLM provider based on the configuration.
///
/// Returns an error if the API key cannot be resolved or the HTTP client cannot be built.
pub fn create_provider(
    config: &LlmConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let api_key = resolve_api_key(config)?;
    Ok(Arc::new(OpenAiCompatibleProvider::new_with_key(
        config,
        api_key,
        retry.clone(),
    )?))
}
