//! Research engine: drives one question through the whole pipeline.
//!
//! Planning, the initial parallel batch, gap-filling follow-up rounds,
//! synthesis, and fact checking run in that order. Every model call goes
//! through a per-run `MeteredProvider` so the outcome carries token totals.

use super::agent::{SubAgentReport, SubResearchAgent};
use super::fact_check::{FactChecker, format_verification_markdown};
use super::gaps::{GapAnalyzer, run_followup_rounds};
use super::planner::Planner;
use super::plan::StepStatus;
use super::runner::{ParallelRunner, record_results};
use super::session::{ResearchCallback, ResearchOutcome, ResearchPhase};
use super::sources::SourceMap;
use super::synthesis::Synthesizer;
use crate::brain::{LlmProvider, MeteredProvider};
use crate::config::QuarryConfig;
use crate::error::Result;
use crate::guardrails::Guardrails;
use crate::providers::create_provider;
use crate::search::{SearchProvider, SourceResult, create_search_provider};
use crate::types::ReasoningEffort;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the engine needs beyond its providers.
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub guardrails: Guardrails,
    pub planner_model: String,
    pub research_model: String,
    pub synthesis_model: String,
    pub verification_model: String,
    pub search_type: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Stream the planner so reasoning reaches `on_reasoning`.
    pub stream_reasoning: bool,
    /// Forward report chunks to `on_synthesis_chunk` as they arrive.
    pub stream_synthesis: bool,
    pub max_tokens: Option<usize>,
}

impl ResearchSettings {
    /// Same model for every stage, default guardrails.
    pub fn with_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            guardrails: Guardrails::default(),
            planner_model: model.clone(),
            research_model: model.clone(),
            synthesis_model: model.clone(),
            verification_model: model,
            search_type: "auto".to_string(),
            reasoning_effort: None,
            stream_reasoning: false,
            stream_synthesis: false,
            max_tokens: None,
        }
    }

    pub fn from_config(config: &QuarryConfig) -> Self {
        let llm = &config.llm;
        Self {
            guardrails: Guardrails::resolve(&config.research),
            planner_model: llm.model_for(llm.planner_model.as_ref()),
            research_model: llm.model_for(llm.research_model.as_ref()),
            synthesis_model: llm.model_for(llm.synthesis_model.as_ref()),
            verification_model: llm.model_for(llm.verification_model.as_ref()),
            search_type: config.search.search_type.clone(),
            reasoning_effort: llm.reasoning_effort,
            stream_reasoning: llm.stream_reasoning,
            stream_synthesis: llm.use_streaming,
            max_tokens: Some(llm.max_tokens),
        }
    }
}

/// Runs research questions end to end.
pub struct ResearchEngine {
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    settings: ResearchSettings,
}

impl ResearchEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            llm,
            search,
            settings,
        }
    }

    /// Build the configured providers. Fails if either credential is missing.
    pub fn from_config(config: &QuarryConfig) -> Result<Self> {
        for warning in config.llm.validate() {
            warn!("{warning}");
        }
        let llm = create_provider(&config.llm, &config.retry)?;
        let search = create_search_provider(&config.search, &config.retry)?;
        Ok(Self::new(llm, search, ResearchSettings::from_config(config)))
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Research `question` and return the report with everything that produced it.
    pub async fn run(
        &self,
        question: &str,
        callback: &dyn ResearchCallback,
    ) -> Result<ResearchOutcome> {
        let started_at = Utc::now();
        let metered = Arc::new(MeteredProvider::new(self.llm.clone()));
        let llm: Arc<dyn LlmProvider> = metered.clone();
        let settings = &self.settings;
        let guardrails = &settings.guardrails;
        info!(question = %question, "Research started");

        callback.on_phase_change(ResearchPhase::Planning);
        let planner = Planner::new(llm.clone(), &settings.planner_model, guardrails)
            .with_reasoning_effort(settings.reasoning_effort);
        let mut plan = if settings.stream_reasoning {
            planner
                .create_plan_streaming(question, &|r: &str| callback.on_reasoning(r))
                .await?
        } else {
            planner.create_plan(question).await?
        };
        callback.on_plan_ready(&plan);

        callback.on_phase_change(ResearchPhase::Researching);
        let agent = SubResearchAgent::new(
            llm.clone(),
            self.search.clone(),
            &settings.research_model,
            guardrails.clone(),
        )
        .with_search_type(&settings.search_type);
        let runner = ParallelRunner::new(Arc::new(agent), guardrails.concurrency);
        for step in &mut plan.steps {
            step.status = StepStatus::InProgress;
        }
        let batch = plan.steps.clone();
        let mut reports = runner.run_parallel(&batch, callback).await;
        record_results(&mut plan, &reports);

        if guardrails.max_followup_rounds > 0 {
            callback.on_phase_change(ResearchPhase::FollowUp);
            let analyzer = GapAnalyzer::new(llm.clone(), &settings.research_model, guardrails);
            let rounds = run_followup_rounds(
                &analyzer,
                &runner,
                &mut plan,
                &mut reports,
                guardrails.max_followup_rounds,
                callback,
            )
            .await;
            info!(rounds, steps = plan.steps.len(), "Follow-up research finished");
        }

        callback.on_phase_change(ResearchPhase::Synthesizing);
        let synthesizer = Synthesizer::new(llm.clone(), &settings.synthesis_model)
            .with_max_tokens(settings.max_tokens);
        let mut report = if settings.stream_synthesis {
            synthesizer
                .synthesize_with(plan.main_question(), &reports, &|c: &str| {
                    callback.on_synthesis_chunk(c)
                })
                .await?
        } else {
            synthesizer.synthesize(plan.main_question(), &reports).await?
        };

        let verification = if guardrails.verify_claims {
            callback.on_phase_change(ResearchPhase::Verifying);
            let checker = FactChecker::new(llm.clone(), &settings.verification_model);
            let result = checker.verify(&report, &ranked_sources(&reports)).await;
            report.push_str(&format_verification_markdown(&result));
            Some(result)
        } else {
            None
        };

        callback.on_phase_change(ResearchPhase::Complete);
        let sources = unique_source_urls(&reports);
        let usage = metered.usage();
        info!(
            steps = plan.steps.len(),
            failed = plan.count_with_status(StepStatus::Error),
            sources = sources.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Research complete"
        );

        Ok(ResearchOutcome {
            id: Uuid::new_v4(),
            question: question.to_string(),
            plan,
            reports,
            report,
            verification,
            sources,
            usage,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Unique source URLs across `reports`, in first-seen order.
pub fn unique_source_urls(reports: &[SubAgentReport]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for source in reports.iter().flat_map(|r| &r.sources) {
        if seen.insert(source.url.as_str()) {
            urls.push(source.url.clone());
        }
    }
    urls
}

/// All report sources merged by URL, best score first.
fn ranked_sources(reports: &[SubAgentReport]) -> Vec<SourceResult> {
    let mut map = SourceMap::new();
    map.merge_all(reports.iter().flat_map(|r| r.sources.iter().cloned()));
    map.to_ranked_vec()
}
