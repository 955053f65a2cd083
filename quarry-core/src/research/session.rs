//! Research run phases, progress callbacks, and persisted outcomes.

use super::agent::SubAgentReport;
use super::fact_check::VerificationResult;
use super::plan::ResearchPlan;
use super::runner::AgentStatus;
use crate::persistence::{atomic_write_json, list_json_files, load_json};
use crate::types::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Current phase of a research run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Decomposing the question.
    Planning,
    /// Running the initial batch of sub-agents.
    Researching,
    /// Gap analysis and follow-up batches.
    FollowUp,
    /// Writing the report.
    Synthesizing,
    /// Checking claims against sources.
    Verifying,
    Complete,
}

impl ResearchPhase {
    /// Rough overall progress at the start of this phase.
    pub fn progress(&self) -> f32 {
        match self {
            ResearchPhase::Planning => 0.05,
            ResearchPhase::Researching => 0.15,
            ResearchPhase::FollowUp => 0.55,
            ResearchPhase::Synthesizing => 0.7,
            ResearchPhase::Verifying => 0.9,
            ResearchPhase::Complete => 1.0,
        }
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResearchPhase::Planning => "Planning",
            ResearchPhase::Researching => "Researching",
            ResearchPhase::FollowUp => "Follow-up research",
            ResearchPhase::Synthesizing => "Synthesizing",
            ResearchPhase::Verifying => "Verifying",
            ResearchPhase::Complete => "Complete",
        };
        write!(f, "{label}")
    }
}

/// Observer for research progress. Every method defaults to a no-op.
pub trait ResearchCallback: Send + Sync {
    /// Called when the run enters a new phase.
    fn on_phase_change(&self, _phase: ResearchPhase) {}
    /// Called once the plan is ready.
    fn on_plan_ready(&self, _plan: &ResearchPlan) {}
    /// Called with a snapshot of every step in the current batch after any change.
    fn on_status_update(&self, _statuses: &[AgentStatus]) {}
    /// Called when a step in the current batch finishes.
    fn on_progress(&self, _completed: usize, _total: usize) {}
    /// Called when a follow-up round adds new steps.
    fn on_followup_round(&self, _round: usize, _new_queries: &[String]) {}
    /// Reasoning tokens from the planner.
    fn on_reasoning(&self, _text: &str) {}
    /// Report text as it is generated.
    fn on_synthesis_chunk(&self, _chunk: &str) {}
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {}

/// Records every callback invocation. Useful in tests.
#[derive(Default)]
pub struct RecordingCallback {
    phases: Mutex<Vec<ResearchPhase>>,
    statuses: Mutex<Vec<Vec<AgentStatus>>>,
    progress: Mutex<Vec<(usize, usize)>>,
    followups: Mutex<Vec<(usize, Vec<String>)>>,
    reasoning: Mutex<String>,
    synthesis: Mutex<String>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phases(&self) -> Vec<ResearchPhase> {
        self.phases.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status_updates(&self) -> usize {
        self.statuses.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last_statuses(&self) -> Option<Vec<AgentStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn followups(&self) -> Vec<(usize, Vec<String>)> {
        self.followups.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reasoning(&self) -> String {
        self.reasoning.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn synthesis(&self) -> String {
        self.synthesis.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResearchCallback for RecordingCallback {
    fn on_phase_change(&self, phase: ResearchPhase) {
        self.phases.lock().unwrap_or_else(|e| e.into_inner()).push(phase);
    }

    fn on_status_update(&self, statuses: &[AgentStatus]) {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(statuses.to_vec());
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((completed, total));
    }

    fn on_followup_round(&self, round: usize, new_queries: &[String]) {
        self.followups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((round, new_queries.to_vec()));
    }

    fn on_reasoning(&self, text: &str) {
        self.reasoning
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(text);
    }

    fn on_synthesis_chunk(&self, chunk: &str) {
        self.synthesis
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(chunk);
    }
}

/// Everything a finished research run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub id: Uuid,
    pub question: String,
    pub plan: ResearchPlan,
    /// Initial batch followed by every follow-up batch.
    pub reports: Vec<SubAgentReport>,
    /// Final report text, with the verification block appended when there is one.
    pub report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Unique source URLs across all reports, first-seen order.
    pub sources: Vec<String>,
    pub usage: TokenUsage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

fn sessions_dir(base_dir: &Path) -> PathBuf {
    base_dir.join("research").join("sessions")
}

impl ResearchOutcome {
    /// Number of reports that stand in for failed steps.
    pub fn failed_steps(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    /// Persist to `<base_dir>/research/sessions/<id>.json` and return the path.
    pub fn save(&self, base_dir: &Path) -> std::io::Result<PathBuf> {
        let path = sessions_dir(base_dir).join(format!("{}.json", self.id));
        atomic_write_json(&path, self)?;
        Ok(path)
    }

    /// Load a saved outcome. `Ok(None)` if it does not exist.
    pub fn load(base_dir: &Path, id: &Uuid) -> std::io::Result<Option<Self>> {
        load_json(&sessions_dir(base_dir).join(format!("{id}.json")))
    }

    /// Summaries of all saved outcomes, newest first. Unreadable files are skipped.
    pub fn list_sessions(base_dir: &Path) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = list_json_files(&sessions_dir(base_dir))
            .into_iter()
            .filter_map(|path| load_json::<ResearchOutcome>(&path).ok().flatten())
            .map(|o| SessionSummary {
                id: o.id,
                question: o.question.clone(),
                steps: o.plan.steps.len(),
                sources: o.sources.len(),
                finished_at: o.finished_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        summaries
    }
}

/// Summary of a saved research outcome for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub question: String,
    pub steps: usize,
    pub sources: usize,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::plan::ResearchStep;
    use tempfile::TempDir;

    fn outcome(question: &str) -> ResearchOutcome {
        let now = Utc::now();
        ResearchOutcome {
            id: Uuid::new_v4(),
            question: question.to_string(),
            plan: ResearchPlan::new(question, vec![ResearchStep::new(1, "a", "a", "")]),
            reports: Vec::new(),
            report: "# Report".to_string(),
            verification: None,
            sources: vec!["https://a".into()],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let original = outcome("What is Rust?");
        let path = original.save(dir.path()).unwrap();
        assert!(path.ends_with(format!("research/sessions/{}.json", original.id)));

        let loaded = ResearchOutcome::load(dir.path(), &original.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.question, "What is Rust?");
        assert_eq!(loaded.plan, original.plan);
        assert_eq!(loaded.usage, original.usage);
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        assert!(
            ResearchOutcome::load(dir.path(), &Uuid::new_v4())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut older = outcome("older");
        older.finished_at = Utc::now() - chrono::Duration::hours(1);
        older.save(dir.path()).unwrap();
        outcome("newer").save(dir.path()).unwrap();
        std::fs::write(sessions_dir(dir.path()).join("junk.json"), "not json").unwrap();

        let list = ResearchOutcome::list_sessions(dir.path());
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].question, "newer");
        assert_eq!(list[1].steps, 1);
    }

    #[test]
    fn test_phase_display_and_progress() {
        assert_eq!(ResearchPhase::FollowUp.to_string(), "Follow-up research");
        assert!(ResearchPhase::Planning.progress() < ResearchPhase::Complete.progress());
    }

    #[test]
    fn test_recording_callback() {
        let cb = RecordingCallback::new();
        cb.on_phase_change(ResearchPhase::Planning);
        cb.on_reasoning("a");
        cb.on_reasoning("b");
        cb.on_synthesis_chunk("# T");
        cb.on_progress(1, 2);
        assert_eq!(cb.phases(), vec![ResearchPhase::Planning]);
        assert_eq!(cb.reasoning(), "ab");
        assert_eq!(cb.synthesis(), "# T");
        assert_eq!(cb.progress(), vec![(1, 2)]);
        assert!(cb.last_statuses().is_none());

        let noop = NoOpResearchCallback;
        noop.on_phase_change(ResearchPhase::Complete);
    }
}
