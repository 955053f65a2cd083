//! # Quarry Core
//!
//! Core library for Quarry, a multi-step web research engine.
//! Provides the language model and search provider abstractions, layered
//! configuration, guardrails, and the research pipeline.

pub mod brain;
pub mod config;
pub mod error;
pub mod guardrails;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod retry;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MeteredProvider, MockLlmProvider};
pub use config::{QuarryConfig, load_config};
pub use error::{LlmError, QuarryError, Result, SearchError};
pub use guardrails::Guardrails;
pub use research::{
    NoOpResearchCallback, ResearchCallback, ResearchEngine, ResearchOutcome, ResearchPhase,
    ResearchSettings,
};
pub use search::{MockSearchProvider, SearchProvider, SourceResult};
pub use types::{CompletionRequest, CompletionResponse, CostEstimate, StreamEvent, TokenUsage};
