//! Resolved per-run research limits.
//!
//! `Guardrails::resolve` turns the optional values in [`ResearchConfig`] into a
//! concrete, immutable set of limits: unset values take their defaults and
//! user overrides are clamped to hard ceilings.

use crate::config::ResearchConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SEARCH_ROUNDS: usize = 5;
pub const MAX_SEARCH_ROUNDS_CEILING: usize = 50;
pub const DEFAULT_MAX_EXPANDED_URLS: usize = 5;
pub const MAX_EXPANDED_URLS_CEILING: usize = 50;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 2;
pub const MAX_RECURSION_DEPTH_CEILING: usize = 5;
pub const DEFAULT_EXPANSION_CANDIDATES: usize = 8;
pub const EXPANSION_CANDIDATES_CEILING: usize = 50;
pub const DEFAULT_SOURCE_TEXT_CHARS: usize = 2_200;
pub const DEFAULT_EXPANDED_TEXT_CHARS: usize = 4_500;
pub const TEXT_CHARS_CEILING: usize = 100_000;
pub const DEFAULT_MAX_TOTAL_SOURCE_CHARS: usize = 65_000;
pub const CONCURRENCY_CEILING: usize = 32;
pub const DEFAULT_MAX_FOLLOWUP_ROUNDS: usize = 2;
pub const MAX_FOLLOWUP_ROUNDS_CEILING: usize = 10;
pub const DEFAULT_MAX_GAPS_PER_ROUND: usize = 5;
pub const MAX_GAPS_PER_ROUND_CEILING: usize = 10;
pub const DEFAULT_MIN_PLAN_STEPS: usize = 4;
pub const DEFAULT_MAX_PLAN_STEPS: usize = 7;
pub const PLAN_STEPS_CEILING: usize = 15;
pub const DEFAULT_RESULTS_PER_SEARCH: usize = 8;
pub const RESULTS_PER_SEARCH_CEILING: usize = 25;

/// Concrete research limits for one run or one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardrails {
    /// Search rounds per sub-agent, at least 1.
    pub max_search_rounds: usize,
    /// URLs fetched in full per sub-agent. 0 disables expansion.
    pub max_expanded_urls: usize,
    pub max_recursion_depth: usize,
    /// Top-ranked sources offered to the model when choosing what to expand.
    pub expansion_candidates: usize,
    pub source_text_chars: usize,
    pub expanded_text_chars: usize,
    /// Budget for the analysis context. `None` means unlimited.
    pub max_total_source_chars: Option<usize>,
    /// Worker pool size. `None` means one worker per step in the batch.
    pub concurrency: Option<usize>,
    /// 0 disables the follow-up loop.
    pub max_followup_rounds: usize,
    pub max_gaps_per_round: usize,
    pub min_plan_steps: usize,
    pub max_plan_steps: usize,
    pub results_per_search: usize,
    pub expand_sources: bool,
    pub verify_claims: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::resolve(&ResearchConfig::default())
    }
}

fn clamp(value: Option<usize>, default: usize, min: usize, ceiling: usize) -> usize {
    value.unwrap_or(default).clamp(min, ceiling)
}

impl Guardrails {
    /// Resolve limits from raw configuration values.
    pub fn resolve(config: &ResearchConfig) -> Self {
        let max_plan_steps = clamp(
            config.max_plan_steps,
            DEFAULT_MAX_PLAN_STEPS,
            1,
            PLAN_STEPS_CEILING,
        );
        let min_plan_steps = clamp(
            config.min_plan_steps,
            DEFAULT_MIN_PLAN_STEPS.min(max_plan_steps),
            1,
            max_plan_steps,
        );

        Self {
            max_search_rounds: clamp(
                config.max_search_rounds,
                DEFAULT_MAX_SEARCH_ROUNDS,
                1,
                MAX_SEARCH_ROUNDS_CEILING,
            ),
            max_expanded_urls: clamp(
                config.max_expanded_urls,
                DEFAULT_MAX_EXPANDED_URLS,
                0,
                MAX_EXPANDED_URLS_CEILING,
            ),
            max_recursion_depth: clamp(
                config.max_recursion_depth,
                DEFAULT_MAX_RECURSION_DEPTH,
                0,
                MAX_RECURSION_DEPTH_CEILING,
            ),
            expansion_candidates: clamp(
                config.expansion_candidates,
                DEFAULT_EXPANSION_CANDIDATES,
                1,
                EXPANSION_CANDIDATES_CEILING,
            ),
            source_text_chars: clamp(
                config.source_text_chars,
                DEFAULT_SOURCE_TEXT_CHARS,
                1,
                TEXT_CHARS_CEILING,
            ),
            expanded_text_chars: clamp(
                config.expanded_text_chars,
                DEFAULT_EXPANDED_TEXT_CHARS,
                1,
                TEXT_CHARS_CEILING,
            ),
            max_total_source_chars: match config.max_total_source_chars {
                Some(0) => None,
                Some(n) => Some(n),
                None => Some(DEFAULT_MAX_TOTAL_SOURCE_CHARS),
            },
            concurrency: config
                .concurrency
                .map(|n| n.clamp(1, CONCURRENCY_CEILING)),
            max_followup_rounds: clamp(
                config.max_followup_rounds,
                DEFAULT_MAX_FOLLOWUP_ROUNDS,
                0,
                MAX_FOLLOWUP_ROUNDS_CEILING,
            ),
            max_gaps_per_round: clamp(
                config.max_gaps_per_round,
                DEFAULT_MAX_GAPS_PER_ROUND,
                1,
                MAX_GAPS_PER_ROUND_CEILING,
            ),
            min_plan_steps,
            max_plan_steps,
            results_per_search: clamp(
                config.results_per_search,
                DEFAULT_RESULTS_PER_SEARCH,
                1,
                RESULTS_PER_SEARCH_CEILING,
            ),
            expand_sources: config.expand_sources.unwrap_or(true),
            verify_claims: config.verify_claims.unwrap_or(true),
        }
    }

    /// Limits for a recursively spawned child agent: one fewer search round, floor 1.
    pub fn for_child(&self) -> Self {
        Self {
            max_search_rounds: self.max_search_rounds.saturating_sub(1).max(1),
            ..self.clone()
        }
    }

    /// Worker pool size for a batch of `batch_len` steps.
    pub fn pool_size(&self, batch_len: usize) -> usize {
        self.concurrency.unwrap_or(batch_len).min(batch_len)
    }

    /// Whether source expansion should run, given a per-call override.
    pub fn expansion_enabled(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.expand_sources) && self.max_expanded_urls > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let g = Guardrails::default();
        assert_eq!(g.max_search_rounds, 5);
        assert_eq!(g.max_expanded_urls, 5);
        assert_eq!(g.max_recursion_depth, 2);
        assert_eq!(g.expansion_candidates, 8);
        assert_eq!(g.source_text_chars, 2_200);
        assert_eq!(g.expanded_text_chars, 4_500);
        assert_eq!(g.max_total_source_chars, Some(65_000));
        assert_eq!(g.concurrency, None);
        assert_eq!(g.max_followup_rounds, 2);
        assert_eq!(g.max_gaps_per_round, 5);
        assert_eq!((g.min_plan_steps, g.max_plan_steps), (4, 7));
        assert!(g.expand_sources);
        assert!(g.verify_claims);
    }

    #[test]
    fn test_overrides_clamped_to_ceilings() {
        let config = ResearchConfig {
            max_search_rounds: Some(500),
            max_expanded_urls: Some(999),
            max_recursion_depth: Some(42),
            concurrency: Some(1_000),
            max_followup_rounds: Some(100),
            max_gaps_per_round: Some(50),
            results_per_search: Some(200),
            ..Default::default()
        };
        let g = Guardrails::resolve(&config);
        assert_eq!(g.max_search_rounds, MAX_SEARCH_ROUNDS_CEILING);
        assert_eq!(g.max_expanded_urls, MAX_EXPANDED_URLS_CEILING);
        assert_eq!(g.max_recursion_depth, MAX_RECURSION_DEPTH_CEILING);
        assert_eq!(g.concurrency, Some(CONCURRENCY_CEILING));
        assert_eq!(g.max_followup_rounds, MAX_FOLLOWUP_ROUNDS_CEILING);
        assert_eq!(g.max_gaps_per_round, MAX_GAPS_PER_ROUND_CEILING);
        assert_eq!(g.results_per_search, RESULTS_PER_SEARCH_CEILING);
    }

    #[test]
    fn test_zero_values() {
        let config = ResearchConfig {
            max_search_rounds: Some(0),
            max_total_source_chars: Some(0),
            max_followup_rounds: Some(0),
            max_recursion_depth: Some(0),
            concurrency: Some(0),
            ..Default::default()
        };
        let g = Guardrails::resolve(&config);
        assert_eq!(g.max_search_rounds, 1);
        assert_eq!(g.max_total_source_chars, None);
        assert_eq!(g.max_followup_rounds, 0);
        assert_eq!(g.max_recursion_depth, 0);
        assert_eq!(g.concurrency, Some(1));
    }

    #[test]
    fn test_plan_step_bounds_ordered() {
        let config = ResearchConfig {
            min_plan_steps: Some(9),
            max_plan_steps: Some(3),
            ..Default::default()
        };
        let g = Guardrails::resolve(&config);
        assert_eq!(g.max_plan_steps, 3);
        assert_eq!(g.min_plan_steps, 3);
    }

    #[test]
    fn test_for_child_reduces_rounds_with_floor() {
        let parent = Guardrails::default();
        let child = parent.for_child();
        assert_eq!(child.max_search_rounds, 4);
        assert_eq!(child.max_recursion_depth, parent.max_recursion_depth);

        let mut g = parent.clone();
        for _ in 0..10 {
            g = g.for_child();
        }
        assert_eq!(g.max_search_rounds, 1);
    }

    #[test]
    fn test_pool_size() {
        let mut g = Guardrails::default();
        assert_eq!(g.pool_size(6), 6);
        g.concurrency = Some(2);
        assert_eq!(g.pool_size(6), 2);
        assert_eq!(g.pool_size(1), 1);
        assert_eq!(g.pool_size(0), 0);
    }

    #[test]
    fn test_expansion_enabled() {
        let mut g = Guardrails::default();
        assert!(g.expansion_enabled(None));
        assert!(!g.expansion_enabled(Some(false)));
        g.max_expanded_urls = 0;
        assert!(!g.expansion_enabled(Some(true)));
    }
}
