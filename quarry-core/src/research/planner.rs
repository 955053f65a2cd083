//! Question decomposition.
//!
//! Asks the model to split a question into sub-questions and turns its JSON
//! answer into a validated `ResearchPlan`.

use super::json::{parse_model_json, preview};
use super::plan::{ResearchPlan, ResearchStep};
use super::prompts;
use crate::brain::{LlmProvider, collect_streaming};
use crate::error::{PlanningError, Result};
use crate::guardrails::Guardrails;
use crate::types::{CompletionRequest, ReasoningEffort};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default, alias = "main_question")]
    main_question: Option<String>,
    #[serde(alias = "subQuestions", alias = "sub_questions")]
    steps: Vec<RawStep>,
    #[serde(default, alias = "expected_insights")]
    expected_insights: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    /// Models emit numbers or numeric strings.
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default, alias = "search_query", alias = "query")]
    search_query: Option<String>,
    #[serde(default, alias = "rationale")]
    purpose: Option<String>,
}

fn step_id(value: Option<&Value>) -> Option<u32> {
    let id = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(id).ok().filter(|id| *id > 0)
}

/// Turns a question into a `ResearchPlan`.
pub struct Planner {
    llm: Arc<dyn LlmProvider>,
    model: String,
    min_steps: usize,
    max_steps: usize,
    reasoning_effort: Option<ReasoningEffort>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, guardrails: &Guardrails) -> Self {
        Self {
            llm,
            model: model.into(),
            min_steps: guardrails.min_plan_steps,
            max_steps: guardrails.max_plan_steps,
            reasoning_effort: None,
        }
    }

    pub fn with_reasoning_effort(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    fn request(&self, question: &str) -> CompletionRequest {
        let user = format!(
            "Research question: {question}\n\n\
             Break this into between {} and {} sub-questions.",
            self.min_steps, self.max_steps
        );
        CompletionRequest::with_prompt(prompts::PLANNER, user)
            .model(Some(self.model.clone()))
            .temperature(0.3)
            .reasoning_effort(self.reasoning_effort)
    }

    /// Decompose `question` into a plan.
    pub async fn create_plan(&self, question: &str) -> Result<ResearchPlan> {
        let response = self.llm.complete(self.request(question)).await?;
        let plan = self.parse_plan(question, response.text())?;
        info!(steps = plan.steps.len(), "Research plan created");
        Ok(plan)
    }

    /// Same as `create_plan`, forwarding reasoning tokens to `reasoning_sink` as they arrive.
    ///
    /// Only the answer content is parsed.
    pub async fn create_plan_streaming(
        &self,
        question: &str,
        reasoning_sink: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<ResearchPlan> {
        let content =
            collect_streaming(self.llm.clone(), self.request(question), reasoning_sink).await?;
        let plan = self.parse_plan(question, &content)?;
        info!(steps = plan.steps.len(), "Research plan created (streamed)");
        Ok(plan)
    }

    /// Parse and normalize a raw model answer into a plan.
    pub fn parse_plan(&self, question: &str, raw: &str) -> std::result::Result<ResearchPlan, PlanningError> {
        let parsed: RawPlan = parse_model_json(raw).map_err(|e| PlanningError::Unparseable {
            reason: e.reason,
            preview: e.preview,
        })?;

        let mut steps: Vec<(Option<u32>, ResearchStep)> = parsed
            .steps
            .into_iter()
            .filter_map(|raw_step| {
                let question = raw_step.question?.trim().to_string();
                if question.is_empty() {
                    return None;
                }
                let step = ResearchStep::new(
                    0,
                    question,
                    raw_step.search_query.unwrap_or_default().trim(),
                    raw_step.purpose.unwrap_or_default().trim(),
                );
                Some((step_id(raw_step.id.as_ref()), step))
            })
            .collect();

        if steps.is_empty() {
            return Err(PlanningError::EmptyPlan {
                preview: preview(raw, 200),
            });
        }
        if steps.len() > self.max_steps {
            debug!(
                proposed = steps.len(),
                max = self.max_steps,
                "Truncating plan to max steps"
            );
            steps.truncate(self.max_steps);
        }

        let mut ids: Vec<u32> = steps
            .iter()
            .enumerate()
            .map(|(i, (id, _))| id.unwrap_or(i as u32 + 1))
            .collect();
        let unique: HashSet<u32> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            debug!("Plan step ids collide, renumbering");
            ids = (1..=steps.len() as u32).collect();
        }

        let steps = steps
            .into_iter()
            .zip(ids)
            .map(|((_, mut step), id)| {
                step.id = id;
                step
            })
            .collect();

        let main_question = parsed
            .main_question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| question.trim().to_string());

        let mut plan = ResearchPlan::new(main_question, steps);
        plan.expected_insights = parsed
            .expected_insights
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::QuarryError;
    use crate::research::plan::StepStatus;
    use std::sync::Mutex;

    fn planner(llm: MockLlmProvider) -> Planner {
        Planner::new(Arc::new(llm), "planner-model", &Guardrails::default())
    }

    fn parse(raw: &str) -> std::result::Result<ResearchPlan, PlanningError> {
        planner(MockLlmProvider::new()).parse_plan("Original question?", raw)
    }

    #[test]
    fn test_parse_fills_defaults() {
        let plan = parse(
            r#"{"steps": [
                {"question": "What is X?"},
                {"id": 2, "question": "How does X work?", "searchQuery": "X internals", "purpose": "mechanics"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(plan.main_question(), "Original question?");
        assert_eq!(plan.steps[0].id, 1);
        assert_eq!(plan.steps[0].search_query, "What is X?");
        assert_eq!(plan.steps[1].search_query, "X internals");
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_parse_drops_empty_questions_and_renumbers_collisions() {
        let plan = parse(
            r#"{"steps": [
                {"id": 1, "question": "A"},
                {"id": 1, "question": "B"},
                {"id": 3, "question": "   "},
                {"id": "4", "question": "C"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_truncates_to_max_steps() {
        let steps: Vec<String> = (1..=12)
            .map(|i| format!(r#"{{"id": {i}, "question": "Q{i}"}}"#))
            .collect();
        let raw = format!(r#"{{"steps": [{}]}}"#, steps.join(","));
        let plan = parse(&raw).unwrap();
        assert_eq!(plan.steps.len(), 7);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("I cannot help with that."),
            Err(PlanningError::Unparseable { .. })
        ));
        assert!(matches!(
            parse(r#"{"steps": [{"question": ""}]}"#),
            Err(PlanningError::EmptyPlan { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_plan_sends_bounds_and_model() {
        let llm = Arc::new(MockLlmProvider::with_response(
            r#"{"mainQuestion": "Q", "steps": [{"question": "a"}]}"#,
        ));
        let planner = Planner::new(llm.clone(), "planner-model", &Guardrails::default());
        let plan = planner.create_plan("Q").await.unwrap();
        assert_eq!(plan.steps.len(), 1);

        let requests = llm.requests();
        assert_eq!(requests[0].model.as_deref(), Some("planner-model"));
        assert_eq!(requests[0].system_prompt(), Some(prompts::PLANNER));
        assert!(
            requests[0]
                .last_user_message()
                .unwrap()
                .contains("between 4 and 7")
        );
    }

    #[tokio::test]
    async fn test_create_plan_model_error_propagates() {
        let llm = MockLlmProvider::new();
        llm.queue_error(crate::error::LlmError::AuthFailed {
            provider: "openrouter".into(),
        });
        let err = planner(llm).create_plan("Q").await.unwrap_err();
        assert!(matches!(err, QuarryError::Llm(_)));
    }

    #[tokio::test]
    async fn test_streaming_parses_content_not_reasoning() {
        let llm = MockLlmProvider::with_response(r#"{"steps": [{"question": "a"}, {"question": "b"}]}"#)
            .with_reasoning("{\"steps\": [] } thinking about it");
        let seen = Mutex::new(String::new());
        let plan = planner(llm)
            .create_plan_streaming("Q", &|r| seen.lock().unwrap().push_str(r))
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(seen.lock().unwrap().contains("thinking"));
    }
}
