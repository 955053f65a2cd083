//! Coverage review and gap-filling follow-up rounds.
//!
//! After a batch of sub-agents finishes, the model reviews a compact digest of
//! what was found and proposes targeted follow-up queries. Proposals are
//! filtered against every query already executed, appended to the plan, and
//! run as a fresh batch.

use super::agent::SubAgentReport;
use super::json::parse_model_json;
use super::plan::{ResearchPlan, StepStatus};
use super::prompts;
use super::runner::{ParallelRunner, record_results};
use super::session::ResearchCallback;
use super::sources::normalize_query;
use crate::brain::LlmProvider;
use crate::error::{LlmError, Result};
use crate::guardrails::Guardrails;
use crate::types::CompletionRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DIGEST_INSIGHTS: usize = 3;

/// A missing piece of coverage with the query meant to fill it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "search_query", alias = "query")]
    pub search_query: String,
    #[serde(default)]
    pub purpose: String,
}

/// The model's verdict on coverage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    #[serde(default)]
    pub sufficient: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

/// Normalized form of every query run so far. Only grows.
#[derive(Debug, Clone, Default)]
pub struct ExecutedQueries {
    seen: HashSet<String>,
}

impl ExecutedQueries {
    /// Seed with the search query of every step in `plan`.
    pub fn from_plan(plan: &ResearchPlan) -> Self {
        let mut executed = Self::default();
        for step in &plan.steps {
            executed.insert(step.initial_query());
        }
        executed
    }

    /// Record a query. Returns false if it was empty or already present.
    pub fn insert(&mut self, query: &str) -> bool {
        let normalized = normalize_query(query);
        !normalized.is_empty() && self.seen.insert(normalized)
    }

    pub fn contains(&self, query: &str) -> bool {
        self.seen.contains(&normalize_query(query))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Keep gaps whose query is non-empty and new, recording each survivor.
///
/// Duplicates within `gaps` itself are dropped too.
pub fn filter_gaps(gaps: Vec<Gap>, executed: &mut ExecutedQueries) -> Vec<Gap> {
    gaps.into_iter()
        .filter(|gap| {
            let accepted = executed.insert(&gap.search_query);
            if !accepted {
                debug!(query = %gap.search_query, "Dropping empty or repeated gap query");
            }
            accepted
        })
        .collect()
}

/// Compact per-report digest used for coverage review.
pub fn report_digest(reports: &[SubAgentReport]) -> String {
    let mut digest = String::new();
    for (i, report) in reports.iter().enumerate() {
        let _ = writeln!(digest, "{}. {}", i + 1, report.step.question);
        let _ = writeln!(digest, "   Query: {}", report.step.initial_query());
        let _ = writeln!(digest, "   Sources: {}", report.sources.len());
        if report.is_failed() {
            let _ = writeln!(digest, "   FAILED");
        } else if report.sources.is_empty() {
            let _ = writeln!(digest, "   (no sources)");
        } else if report.key_insights.is_empty() {
            let _ = writeln!(digest, "   (no insights)");
        } else {
            for insight in report.key_insights.iter().take(DIGEST_INSIGHTS) {
                let _ = writeln!(digest, "   - {insight}");
            }
        }
    }
    digest
}

/// Asks the model whether coverage is sufficient and what is missing.
pub struct GapAnalyzer {
    llm: Arc<dyn LlmProvider>,
    model: String,
    max_gaps: usize,
}

impl GapAnalyzer {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, guardrails: &Guardrails) -> Self {
        Self {
            llm,
            model: model.into(),
            max_gaps: guardrails.max_gaps_per_round,
        }
    }

    /// Review `reports` against `main_question`. At most `max_gaps_per_round` gaps are returned.
    pub async fn analyze(
        &self,
        main_question: &str,
        reports: &[SubAgentReport],
    ) -> Result<GapAnalysis> {
        let user = format!(
            "Main question: {main_question}\n\n\
             Research completed so far:\n{}\n\
             List at most {} gaps.",
            report_digest(reports),
            self.max_gaps
        );
        let request = CompletionRequest::with_prompt(prompts::GAP_ANALYSIS, user)
            .model(Some(self.model.clone()))
            .temperature(0.2);
        let response = self.llm.complete(request).await?;

        let mut analysis: GapAnalysis =
            parse_model_json(response.text()).map_err(|e| LlmError::ResponseParse {
                message: format!("gap analysis: {e}"),
            })?;
        analysis.gaps.truncate(self.max_gaps);
        debug!(
            sufficient = analysis.sufficient,
            gaps = analysis.gaps.len(),
            "Gap analysis complete"
        );
        Ok(analysis)
    }
}

/// Run up to `max_rounds` rounds of gap analysis and follow-up research.
///
/// New steps are appended to `plan`, their reports to `reports`. Returns the
/// number of rounds that ran a batch.
pub async fn run_followup_rounds(
    analyzer: &GapAnalyzer,
    runner: &ParallelRunner,
    plan: &mut ResearchPlan,
    reports: &mut Vec<SubAgentReport>,
    max_rounds: usize,
    callback: &dyn ResearchCallback,
) -> usize {
    let mut executed = ExecutedQueries::from_plan(plan);
    let mut rounds = 0;

    for round in 1..=max_rounds {
        let analysis = match analyzer.analyze(plan.main_question(), reports).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(round, error = %e, "Gap analysis failed, ending follow-up research");
                break;
            }
        };
        if analysis.sufficient {
            info!(round, reasoning = %analysis.reasoning, "Coverage judged sufficient");
            break;
        }

        let gaps = filter_gaps(analysis.gaps, &mut executed);
        if gaps.is_empty() {
            info!(round, "No new gaps to research");
            break;
        }

        let first_new = plan.steps.len();
        for gap in &gaps {
            let question = if gap.description.trim().is_empty() {
                gap.search_query.trim()
            } else {
                gap.description.trim()
            };
            let purpose = if gap.purpose.trim().is_empty() {
                "Fill a coverage gap"
            } else {
                gap.purpose.trim()
            };
            plan.append_step(question, gap.search_query.trim(), purpose);
        }
        for step in &mut plan.steps[first_new..] {
            step.status = StepStatus::InProgress;
        }
        let batch = plan.steps[first_new..].to_vec();
        let queries: Vec<String> = batch.iter().map(|s| s.search_query.clone()).collect();
        info!(round, new_steps = batch.len(), "Starting follow-up round");
        callback.on_followup_round(round, &queries);

        let batch_reports = runner.run_parallel(&batch, callback).await;
        record_results(plan, &batch_reports);
        reports.extend(batch_reports);
        rounds = round;
    }
    rounds
}
