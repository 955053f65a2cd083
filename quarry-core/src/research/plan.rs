//! Research plan data model.
//!
//! A `ResearchPlan` is an append-only log of investigation threads: the
//! planner creates the initial steps and the follow-up loop appends more.

use crate::search::SearchResponse;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single research step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in progress"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

/// One sub-question to investigate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStep {
    /// Positive, unique within a plan.
    pub id: u32,
    pub question: String,
    /// Query sent to the search provider.
    pub search_query: String,
    /// Why this step matters for the main question.
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Last search response seen for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<SearchResponse>,
}

impl ResearchStep {
    /// Create a pending step. An empty search query falls back to the question.
    pub fn new(
        id: u32,
        question: impl Into<String>,
        search_query: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Self {
        let question = question.into();
        let search_query = search_query.into();
        let search_query = if search_query.trim().is_empty() {
            question.clone()
        } else {
            search_query
        };
        Self {
            id,
            question,
            search_query,
            purpose: purpose.into(),
            status: StepStatus::Pending,
            results: None,
        }
    }

    /// The query to search first: `search_query`, or `question` if that is blank.
    pub fn initial_query(&self) -> &str {
        if self.search_query.trim().is_empty() {
            &self.question
        } else {
            &self.search_query
        }
    }
}

/// A decomposed research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    main_question: String,
    pub steps: Vec<ResearchStep>,
    /// Advisory only.
    #[serde(default)]
    pub expected_insights: Vec<String>,
}

impl ResearchPlan {
    pub fn new(main_question: impl Into<String>, steps: Vec<ResearchStep>) -> Self {
        Self {
            main_question: main_question.into(),
            steps,
            expected_insights: Vec::new(),
        }
    }

    pub fn main_question(&self) -> &str {
        &self.main_question
    }

    /// Next free step id: one past the largest id in the plan.
    pub fn next_step_id(&self) -> u32 {
        self.steps.iter().map(|s| s.id).max().unwrap_or(0) + 1
    }

    /// Append a new pending step with a fresh id and return that id.
    pub fn append_step(
        &mut self,
        question: impl Into<String>,
        search_query: impl Into<String>,
        purpose: impl Into<String>,
    ) -> u32 {
        let id = self.next_step_id();
        self.steps
            .push(ResearchStep::new(id, question, search_query, purpose));
        id
    }

    pub fn step(&self, id: u32) -> Option<&ResearchStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: u32) -> Option<&mut ResearchStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Number of steps with the given status.
    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_defaults_query_to_question() {
        let step = ResearchStep::new(1, "What is Rust?", "  ", "basics");
        assert_eq!(step.search_query, "What is Rust?");
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.initial_query(), "What is Rust?");
    }

    #[test]
    fn test_append_step_uses_max_id() {
        let mut plan = ResearchPlan::new(
            "q",
            vec![
                ResearchStep::new(1, "a", "a", ""),
                ResearchStep::new(7, "b", "b", ""),
                ResearchStep::new(3, "c", "c", ""),
            ],
        );
        assert_eq!(plan.next_step_id(), 8);
        let id = plan.append_step("d", "", "gap");
        assert_eq!(id, 8);
        assert_eq!(plan.steps.last().unwrap().search_query, "d");
        assert_eq!(plan.next_step_id(), 9);
    }

    #[test]
    fn test_empty_plan_next_id() {
        let plan = ResearchPlan::new("q", Vec::new());
        assert_eq!(plan.next_step_id(), 1);
    }

    #[test]
    fn test_step_mut_and_status_count() {
        let mut plan = ResearchPlan::new("q", vec![ResearchStep::new(1, "a", "a", "")]);
        plan.step_mut(1).unwrap().status = StepStatus::Complete;
        assert!(plan.step_mut(2).is_none());
        assert_eq!(plan.count_with_status(StepStatus::Complete), 1);
        assert_eq!(plan.step(1).unwrap().status.to_string(), "complete");
    }

    #[test]
    fn test_main_question_serializes() {
        let plan = ResearchPlan::new("Why?", Vec::new());
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["main_question"], "Why?");
        let back: ResearchPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back.main_question(), "Why?");
    }
}
