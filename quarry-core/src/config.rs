//! Configuration system for Quarry.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/quarry/config.toml` and/or `.quarry/config.toml`
//! in the workspace directory. The resolved struct is passed explicitly into every component;
//! nothing below this module reads the process environment for tunables.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::ReasoningEffort;

/// Top-level configuration for a Quarry run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openrouter", "openai", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Default model identifier used for every stage without an override.
    pub model: String,
    /// Model used to decompose the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
    /// Model used by sub-research agents (follow-up queries, analysis, sub-topics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_model: Option<String>,
    /// Model used for the final report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_model: Option<String>,
    /// Model used for claim extraction and checking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_model: Option<String>,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Reasoning effort hint forwarded to models that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Stream the final report token by token.
    pub use_streaming: bool,
    /// Stream the planner so its reasoning can be shown while it thinks.
    #[serde(default)]
    pub stream_reasoning: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            planner_model: None,
            research_model: None,
            synthesis_model: None,
            verification_model: None,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
            reasoning_effort: None,
            use_streaming: false,
            stream_reasoning: false,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.model.trim().is_empty() {
            warnings.push("llm.model is empty; requests will be rejected".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }

    /// Resolve the model for a stage, falling back to the default model.
    pub fn model_for(&self, stage: Option<&String>) -> String {
        stage
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| self.model.clone())
    }
}

/// Search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name. Only "exa" is built in.
    pub provider: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Search mode passed to the provider ("auto", "neural", "keyword").
    pub search_type: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "exa".to_string(),
            api_key_env: "EXA_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            search_type: "auto".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Raw research tunables as the user wrote them.
///
/// Every field is optional; `Guardrails::resolve` applies defaults and clamps
/// to hard ceilings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_search_rounds: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_expanded_urls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_recursion_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion_candidates: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_text_chars: Option<usize>,
    /// 0 means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_source_chars: Option<usize>,
    /// Unset means one worker per step in the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// 0 disables follow-up rounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_followup_rounds: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_gaps_per_round: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_plan_steps: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_plan_steps: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_per_search: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand_sources: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_claims: Option<bool>,
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `QUARRY_`)
/// 3. Workspace-local config (`.quarry/config.toml`)
/// 4. User config (`~/.config/quarry/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&QuarryConfig>,
) -> Result<QuarryConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(QuarryConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "quarry", "quarry") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".quarry").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // QUARRY_LLM__MODEL, QUARRY_RESEARCH__MAX_SEARCH_ROUNDS, ...
    figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any Quarry configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "quarry", "quarry")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    workspace
        .map(|ws| ws.join(".quarry").join("config.toml").exists())
        .unwrap_or(false)
}
