//! Sub-research agent.
//!
//! Investigates one `ResearchStep`: sequential search rounds with
//! model-proposed follow-up queries, optional full-text expansion of the most
//! promising sources, a structured analysis, key-finding extraction, and
//! bounded recursion into sub-topics.
//!
//! Only a failed first search or a failed analysis call is returned as an
//! error. Every optional enhancement degrades to "stop and keep what we have".

use super::json::parse_model_json;
use super::plan::{ResearchStep, StepStatus};
use super::prompts;
use super::sources::{SourceMap, normalize_query, truncate_chars};
use crate::brain::LlmProvider;
use crate::error::Result;
use crate::guardrails::Guardrails;
use crate::search::{SearchOptions, SearchProvider, SearchResponse, SourceResult};
use crate::types::CompletionRequest;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Summary prefix of a report produced for a step whose research failed.
pub const FAILURE_MARKER: &str = "Research failed";

const MAX_KEY_FINDINGS: usize = 5;
const MAX_KEY_INSIGHTS: usize = 10;
const MAX_SUBTOPICS: usize = 2;

/// Receives human-readable progress messages.
pub type StatusSink<'s> = dyn Fn(&str) + Send + Sync + 's;

static KEY_FINDINGS_HEADING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*key\s+findings\s*:?\s*(?:\*\*)?\s*:?\s*$").ok()
});

static SECTION_HEADING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#{1,6}\s+\S|\*\*[^*]+\*\*\s*:?\s*$)").ok());

static BULLET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+)$").ok());

/// Output of one sub-agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentReport {
    pub step: ResearchStep,
    pub summary: String,
    /// Deduplicated by URL, ranked by score.
    pub sources: Vec<SourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_sources: Option<Vec<SourceResult>>,
    /// At most ten short findings.
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub depth: usize,
    /// Set only on reports standing in for a failed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubAgentReport {
    /// A degraded report for a step whose research returned an error.
    pub fn failed(step: &ResearchStep, error: &str) -> Self {
        let mut step = step.clone();
        step.status = StepStatus::Error;
        Self {
            summary: format!(
                "{FAILURE_MARKER} for \"{}\": {error}",
                step.question
            ),
            step,
            sources: Vec::new(),
            expanded_sources: None,
            key_insights: Vec::new(),
            depth: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-call options for `SubResearchAgent::research`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResearchOptions {
    /// Overrides `Guardrails::expand_sources` when set.
    pub expand_sources: Option<bool>,
}

#[derive(Deserialize)]
struct QueryReply {
    #[serde(default)]
    query: String,
}

#[derive(Deserialize)]
struct UrlsReply {
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Deserialize)]
struct SubtopicsReply {
    #[serde(default, alias = "subTopics", alias = "sub_topics")]
    subtopics: Vec<SubtopicEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubtopicEntry {
    #[serde(default, alias = "topic")]
    question: String,
    #[serde(default, alias = "search_query")]
    search_query: String,
    #[serde(default)]
    purpose: String,
}

/// Result of the search-round phase.
struct SearchOutcome {
    sources: SourceMap,
    queries: Vec<String>,
    last_response: Option<SearchResponse>,
}

/// Researches a single step. Cheap to construct; holds no per-run state.
pub struct SubResearchAgent {
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    model: String,
    guardrails: Guardrails,
    search_type: String,
    depth: usize,
}

impl SubResearchAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        model: impl Into<String>,
        guardrails: Guardrails,
    ) -> Self {
        Self {
            llm,
            search,
            model: model.into(),
            guardrails,
            search_type: "auto".to_string(),
            depth: 0,
        }
    }

    pub fn with_search_type(mut self, search_type: impl Into<String>) -> Self {
        self.search_type = search_type.into();
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    /// Agent for a sub-topic: one level deeper with a reduced round budget.
    fn child(&self) -> Self {
        Self {
            llm: self.llm.clone(),
            search: self.search.clone(),
            model: self.model.clone(),
            guardrails: self.guardrails.for_child(),
            search_type: self.search_type.clone(),
            depth: self.depth + 1,
        }
    }

    fn search_options(&self) -> SearchOptions {
        let mut options = SearchOptions {
            search_type: self.search_type.clone(),
            num_results: self.guardrails.results_per_search,
            ..Default::default()
        };
        options.contents.text_max_chars = Some(self.guardrails.source_text_chars);
        options
    }

    fn request(&self, system: &str, user: String) -> CompletionRequest {
        CompletionRequest::with_prompt(system, user)
            .model(Some(self.model.clone()))
            .temperature(0.3)
    }

    /// Research `step` and return its report.
    pub fn research<'a>(
        &'a self,
        step: &'a ResearchStep,
        options: &'a ResearchOptions,
        status: &'a StatusSink<'a>,
    ) -> BoxFuture<'a, Result<SubAgentReport>> {
        Box::pin(self.research_inner(step, options, status))
    }

    async fn research_inner(
        &self,
        step: &ResearchStep,
        options: &ResearchOptions,
        status: &StatusSink<'_>,
    ) -> Result<SubAgentReport> {
        debug!(step = step.id, depth = self.depth, question = %step.question, "Sub-agent started");

        let SearchOutcome {
            mut sources,
            queries,
            last_response,
        } = self.search_rounds(step, status).await?;

        let expanded_sources = if self
            .guardrails
            .expansion_enabled(options.expand_sources)
        {
            self.expand(step, &mut sources, status).await
        } else {
            None
        };

        status(&format!("Analyzing {} sources...", sources.len()));
        let mut summary = self.analyze(step, &sources).await?;
        let mut key_insights = extract_key_findings(&summary);

        if self.depth < self.guardrails.max_recursion_depth {
            let subtopics = self.propose_subtopics(step, &summary).await;
            for child_step in subtopics {
                status(&format!("Researching sub-topic: {}", child_step.question));
                let child = self.child();
                let child_status = |msg: &str| status(&format!("  {msg}"));
                match child.research(&child_step, options, &child_status).await {
                    Ok(child_report) => {
                        summary.push_str(&format!(
                            "\n\n### Sub-topic: {}\n\n{}",
                            child_report.step.question, child_report.summary
                        ));
                        sources.merge_all(child_report.sources);
                        merge_insights(&mut key_insights, child_report.key_insights);
                    }
                    Err(e) => {
                        warn!(
                            depth = child.depth(),
                            subtopic = %child_step.question,
                            error = %e,
                            "Sub-topic research failed"
                        );
                        status(&format!("Sub-topic research failed: {e}"));
                    }
                }
            }
        }

        let mut answered = step.clone();
        answered.status = StepStatus::Complete;
        answered.results = last_response;

        info!(
            step = step.id,
            depth = self.depth,
            rounds = queries.len(),
            sources = sources.len(),
            insights = key_insights.len(),
            "Sub-agent finished"
        );

        Ok(SubAgentReport {
            step: answered,
            summary,
            sources: sources.to_ranked_vec(),
            expanded_sources,
            key_insights,
            depth: self.depth,
            error: None,
        })
    }

    /// Run search rounds until the budget is spent or no new query is proposed.
    async fn search_rounds(&self, step: &ResearchStep, status: &StatusSink<'_>) -> Result<SearchOutcome> {
        let max_rounds = self.guardrails.max_search_rounds;
        let options = self.search_options();
        let mut sources = SourceMap::new();
        let mut queries: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_response = None;
        let mut query = step.initial_query().trim().to_string();

        for round in 1..=max_rounds {
            status(&format!("Searching ({round}/{max_rounds})..."));
            match self.search.search(&query, &options).await {
                Ok(response) => {
                    sources.merge_all(response.results.iter().cloned());
                    last_response = Some(response);
                }
                Err(e) if round == 1 => return Err(e.into()),
                Err(e) => {
                    warn!(round, query = %query, error = %e, "Search round failed, stopping");
                    break;
                }
            }
            seen.insert(normalize_query(&query));
            queries.push(query.clone());

            if round == max_rounds {
                break;
            }
            let Some(next) = self.next_query(step, &queries, &sources).await else {
                break;
            };
            if seen.contains(&normalize_query(&next)) {
                debug!(query = %next, "Proposed query already used, stopping");
                break;
            }
            query = next;
        }

        Ok(SearchOutcome {
            sources,
            queries,
            last_response,
        })
    }

    /// Ask the model for one new query. `None` ends the search loop.
    async fn next_query(
        &self,
        step: &ResearchStep,
        queries: &[String],
        sources: &SourceMap,
    ) -> Option<String> {
        let previous = queries
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let top = sources
            .ranked()
            .into_iter()
            .take(5)
            .map(|s| {
                let snippet = s.content().unwrap_or_default();
                format!("- {} ({})\n  {}", s.title, s.url, truncate_chars(&snippet, 200))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Research question: {}\n\nQueries already run:\n{previous}\n\nTop sources so far:\n{top}",
            step.question
        );

        let response = match self.llm.complete(self.request(prompts::FOLLOWUP_QUERY, user)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Follow-up query suggestion failed");
                return None;
            }
        };
        parse_query_reply(response.text())
    }

    /// Let the model pick sources worth reading in full and fetch them.
    async fn expand(
        &self,
        step: &ResearchStep,
        sources: &mut SourceMap,
        status: &StatusSink<'_>,
    ) -> Option<Vec<SourceResult>> {
        if sources.is_empty() {
            return None;
        }
        let candidates: Vec<&SourceResult> = sources
            .ranked()
            .into_iter()
            .take(self.guardrails.expansion_candidates)
            .collect();
        let candidate_urls: HashSet<String> = candidates.iter().map(|s| s.url.clone()).collect();
        let listing = candidates
            .iter()
            .map(|s| {
                let snippet = s.content().unwrap_or_default();
                format!("- {}\n  {}\n  {}", s.url, s.title, truncate_chars(&snippet, 300))
            })
            .collect::<Vec<_>>()
            .join("\n");
        drop(candidates);
        let user = format!(
            "Research question: {}\n\nChoose up to {} URLs to read in full:\n{listing}",
            step.question, self.guardrails.max_expanded_urls
        );

        let response = match self
            .llm
            .complete(self.request(prompts::EXPANSION_SELECTION, user))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Expansion selection failed, skipping expansion");
                return None;
            }
        };
        let urls = select_urls(
            response.text(),
            &candidate_urls,
            self.guardrails.max_expanded_urls,
        );
        if urls.is_empty() {
            return None;
        }

        status(&format!("Reading {} pages in depth...", urls.len()));
        match self.search.get_contents(&urls).await {
            Ok(copies) => {
                let applied = sources.apply_expanded(copies);
                debug!(requested = urls.len(), applied = applied.len(), "Sources expanded");
                (!applied.is_empty()).then_some(applied)
            }
            Err(e) => {
                warn!(error = %e, "Content expansion failed, continuing with snippets");
                None
            }
        }
    }

    async fn analyze(&self, step: &ResearchStep, sources: &SourceMap) -> Result<String> {
        let context = if sources.is_empty() {
            "No sources were found for this question.".to_string()
        } else {
            sources.build_context(
                self.guardrails.source_text_chars,
                self.guardrails.expanded_text_chars,
                self.guardrails.max_total_source_chars,
            )
        };
        let purpose = if step.purpose.trim().is_empty() {
            String::new()
        } else {
            format!("Purpose: {}\n", step.purpose)
        };
        let user = format!(
            "Research question: {}\n{purpose}\nSources:\n\n{context}",
            step.question
        );
        let response = self
            .llm
            .complete(self.request(prompts::ANALYSIS, user))
            .await?;
        Ok(response.text().to_string())
    }

    /// Ask for up to two sub-topics. Any failure yields none.
    async fn propose_subtopics(&self, step: &ResearchStep, summary: &str) -> Vec<ResearchStep> {
        let user = format!(
            "Research question: {}\n\nSummary so far:\n{}",
            step.question,
            truncate_chars(summary, 6_000)
        );
        let response = match self.llm.complete(self.request(prompts::SUBTOPICS, user)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Sub-topic proposal failed");
                return Vec::new();
            }
        };
        let reply: SubtopicsReply = match parse_model_json(response.text()) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "Unparseable sub-topic reply");
                return Vec::new();
            }
        };
        reply
            .subtopics
            .into_iter()
            .filter(|t| !t.question.trim().is_empty())
            .take(MAX_SUBTOPICS)
            .map(|t| ResearchStep::new(step.id, t.question.trim(), t.search_query.trim(), t.purpose))
            .collect()
    }
}

/// Parse a follow-up query reply: `{"query": ...}` or a bare line of text.
fn parse_query_reply(raw: &str) -> Option<String> {
    let query = match parse_model_json::<QueryReply>(raw) {
        Ok(reply) => reply.query,
        Err(_) => {
            let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
            if line.starts_with('{') || line.starts_with('[') || line.len() > 300 {
                return None;
            }
            line.trim_matches(|c| c == '"' || c == '\'' || c == '`')
                .to_string()
        }
    };
    let query = query.trim().to_string();
    (!query.is_empty()).then_some(query)
}

/// URLs from the model's selection that are among the candidates, deduplicated and capped.
fn select_urls(raw: &str, candidates: &HashSet<String>, max: usize) -> Vec<String> {
    let urls = match parse_model_json::<UrlsReply>(raw) {
        Ok(reply) => reply.urls,
        Err(_) => parse_model_json::<Vec<String>>(raw).unwrap_or_default(),
    };
    let mut chosen: Vec<String> = Vec::new();
    for url in urls {
        let url = url.trim();
        if candidates.contains(url) && !chosen.iter().any(|c| c == url) {
            chosen.push(url.to_string());
        }
        if chosen.len() >= max {
            break;
        }
    }
    chosen
}

/// Bullets under the "Key Findings" heading only, at most five.
pub fn extract_key_findings(summary: &str) -> Vec<String> {
    let (Some(heading), Some(section_end), Some(bullet)) = (
        KEY_FINDINGS_HEADING.as_ref(),
        SECTION_HEADING.as_ref(),
        BULLET.as_ref(),
    ) else {
        return Vec::new();
    };

    let mut lines = summary.lines().skip_while(|l| !heading.is_match(l));
    if lines.next().is_none() {
        return Vec::new();
    }
    lines
        .take_while(|l| !section_end.is_match(l))
        .filter_map(|l| bullet.captures(l))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().replace("**", "").trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_KEY_FINDINGS)
        .collect()
}

/// Union `extra` into `insights` (case-insensitive dedup), capped at ten.
fn merge_insights(insights: &mut Vec<String>, extra: Vec<String>) {
    for insight in extra {
        if insights.len() >= MAX_KEY_INSIGHTS {
            break;
        }
        let lower = insight.to_lowercase();
        if !insights.iter().any(|i| i.to_lowercase() == lower) {
            insights.push(insight);
        }
    }
    insights.truncate(MAX_KEY_INSIGHTS);
}
