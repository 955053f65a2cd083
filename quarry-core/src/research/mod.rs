//! Deep research pipeline.
//!
//! A question is decomposed into a plan, each step is researched by a
//! sub-agent in a bounded parallel batch, coverage gaps are filled in
//! follow-up rounds, and the findings are synthesized into a cited report
//! that is then fact-checked against the collected sources.

pub mod agent;
pub mod engine;
pub mod fact_check;
pub mod gaps;
pub mod json;
pub mod plan;
pub mod planner;
pub mod prompts;
pub mod runner;
pub mod session;
pub mod sources;
pub mod synthesis;

pub use agent::{ResearchOptions, SubAgentReport, SubResearchAgent};
pub use engine::{ResearchEngine, ResearchSettings, unique_source_urls};
pub use fact_check::{ClaimStatus, FactChecker, VerificationResult, format_verification_markdown};
pub use gaps::{ExecutedQueries, Gap, GapAnalysis, GapAnalyzer, filter_gaps, run_followup_rounds};
pub use plan::{ResearchPlan, ResearchStep, StepStatus};
pub use planner::Planner;
pub use runner::{AgentStatus, ParallelRunner, StepResearcher};
pub use session::{
    NoOpResearchCallback, RecordingCallback, ResearchCallback, ResearchOutcome, ResearchPhase,
    SessionSummary,
};
pub use sources::SourceMap;
pub use synthesis::Synthesizer;
