//! Integration tests for the research pipeline.
//!
//! These drive the planner, runner, gap loop, synthesizer, and fact checker
//! end to end against `MockLlmProvider` and `MockSearchProvider`, routing each
//! model call on its system prompt.

use pretty_assertions::assert_eq;
use quarry_core::brain::MockLlmProvider;
use quarry_core::error::{LlmError, QuarryError, SearchError};
use quarry_core::guardrails::Guardrails;
use quarry_core::research::gaps::{ExecutedQueries, Gap, filter_gaps};
use quarry_core::research::prompts;
use quarry_core::research::{
    FactChecker, ParallelRunner, Planner, RecordingCallback, ResearchEngine, ResearchOptions,
    ResearchOutcome, ResearchPhase, ResearchPlan, ResearchSettings, ResearchStep, StepStatus,
    SubResearchAgent, format_verification_markdown,
};
use quarry_core::search::MockSearchProvider;
use quarry_core::types::CompletionRequest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const PLAN: &str = r#"{
  "mainQuestion": "How fast is io_uring?",
  "steps": [
    {"id": 1, "question": "What is io_uring?", "searchQuery": "io_uring overview", "purpose": "background"},
    {"id": 2, "question": "How does it compare to epoll?", "searchQuery": "io_uring vs epoll"},
    {"id": 3, "question": "Who uses it in production?", "searchQuery": "io_uring production users"},
    {"id": 4, "question": "What are its security issues?", "searchQuery": "io_uring security"}
  ]
}"#;

fn first_url(text: &str) -> Option<&str> {
    let start = text.find("https://")?;
    text[start..].split_whitespace().next()
}

/// A model that answers every pipeline prompt sensibly. Gap analysis asks for
/// follow-ups on its first call only.
fn scripted_reply(req: &CompletionRequest, gap_calls: &AtomicUsize) -> Result<String, LlmError> {
    let user = req.last_user_message().unwrap_or_default();
    Ok(match req.system_prompt() {
        Some(prompts::PLANNER) => PLAN.to_string(),
        Some(prompts::FOLLOWUP_QUERY) => r#"{"query": ""}"#.to_string(),
        Some(prompts::EXPANSION_SELECTION) => match first_url(user) {
            Some(url) => format!(r#"{{"urls": ["{url}", "https://not-a-candidate.example"]}}"#),
            None => r#"{"urls": []}"#.to_string(),
        },
        Some(prompts::ANALYSIS) => {
            "## Key Findings\n- io_uring batches syscalls\n- It uses shared ring buffers\n\
             ## Details\nMore text.\n## Sources Used\n[Source 1]\n## Gaps\nNone"
                .to_string()
        }
        Some(prompts::SUBTOPICS) => r#"{"subtopics": []}"#.to_string(),
        Some(prompts::GAP_ANALYSIS) => {
            if gap_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                r#"{"sufficient": false, "reasoning": "missing latency data", "gaps": [
                    {"description": "Latency numbers", "searchQuery": "io_uring latency benchmarks"},
                    {"description": "Repeat", "searchQuery": "IO_URING  overview"}
                ]}"#
                .to_string()
            } else {
                r#"{"sufficient": true, "reasoning": "covered", "gaps": []}"#.to_string()
            }
        }
        Some(prompts::SYNTHESIS) => {
            "# io_uring Performance\n\n## Executive Summary\nio_uring batches syscalls [Source 1]."
                .to_string()
        }
        Some(prompts::CLAIM_EXTRACTION) => {
            r#"{"claims": ["io_uring batches syscalls", "io_uring was written in COBOL"]}"#
                .to_string()
        }
        Some(prompts::CLAIM_CHECK) if user.contains("batches syscalls") => {
            r#"{"status": "verified", "evidence": "Full text", "confidence": 0.8}"#.to_string()
        }
        Some(prompts::CLAIM_CHECK) => r#"{"status": "unverified"}"#.to_string(),
        other => panic!("unexpected system prompt: {other:?}"),
    })
}

fn scripted_llm() -> Arc<MockLlmProvider> {
    let gap_calls = AtomicUsize::new(0);
    Arc::new(
        MockLlmProvider::with_handler(move |req| scripted_reply(req, &gap_calls))
            .with_reasoning("Considering the angles "),
    )
}

#[tokio::test]
async fn test_full_pipeline_produces_verified_report() {
    let llm = scripted_llm();
    let search = Arc::new(MockSearchProvider::new());
    let engine = ResearchEngine::new(
        llm.clone(),
        search.clone(),
        ResearchSettings::with_model("test-model"),
    );
    let callback = RecordingCallback::new();

    let outcome = engine
        .run("How fast is io_uring?", &callback)
        .await
        .unwrap();

    assert_eq!(
        callback.phases(),
        vec![
            ResearchPhase::Planning,
            ResearchPhase::Researching,
            ResearchPhase::FollowUp,
            ResearchPhase::Synthesizing,
            ResearchPhase::Verifying,
            ResearchPhase::Complete,
        ]
    );

    // Four planned steps plus one surviving gap; the repeated query is dropped.
    let ids: Vec<u32> = outcome.plan.steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(outcome.plan.steps[4].search_query, "io_uring latency benchmarks");
    assert!(
        outcome
            .plan
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Complete)
    );
    assert_eq!(outcome.reports.len(), 5);
    assert_eq!(outcome.failed_steps(), 0);
    assert_eq!(
        callback.followups(),
        vec![(1, vec!["io_uring latency benchmarks".to_string()])]
    );
    assert_eq!(llm.count_requests_with_system(prompts::GAP_ANALYSIS), 2);

    // Each step expanded exactly its top candidate.
    let requests = search.content_requests();
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|urls| urls.len() == 1));
    assert!(
        outcome.reports[0]
            .expanded_sources
            .as_ref()
            .is_some_and(|e| e.len() == 1)
    );
    assert_eq!(
        outcome.reports[0].key_insights,
        vec!["io_uring batches syscalls", "It uses shared ring buffers"]
    );

    // Three synthetic results per distinct query.
    assert_eq!(outcome.sources.len(), 15);

    let verification = outcome.verification.as_ref().unwrap();
    assert_eq!(verification.total_claims, 2);
    assert_eq!(verification.verified_count, 1);
    assert_eq!(verification.unverified_count, 1);
    assert!(outcome.report.starts_with("# io_uring Performance"));
    assert!(outcome.report.contains("## Fact Check"));
    assert!(outcome.report.contains("- io_uring was written in COBOL"));

    assert!(outcome.usage.input_tokens > 0);
    assert!(outcome.usage.output_tokens > 0);
    assert!(outcome.finished_at >= outcome.started_at);
}

#[tokio::test]
async fn test_streaming_forwards_reasoning_and_report_chunks() {
    let mut settings = ResearchSettings::with_model("test-model");
    settings.stream_reasoning = true;
    settings.stream_synthesis = true;
    settings.guardrails.max_followup_rounds = 0;
    settings.guardrails.verify_claims = false;
    let engine = ResearchEngine::new(scripted_llm(), Arc::new(MockSearchProvider::new()), settings);
    let callback = RecordingCallback::new();

    let outcome = engine.run("How fast is io_uring?", &callback).await.unwrap();

    assert_eq!(callback.reasoning(), "Considering the angles ");
    assert_eq!(callback.synthesis(), outcome.report);
    assert!(outcome.verification.is_none());
    assert!(!callback.phases().contains(&ResearchPhase::FollowUp));
    assert!(!callback.phases().contains(&ResearchPhase::Verifying));
    assert_eq!(outcome.plan.steps.len(), 4);
}

#[tokio::test]
async fn test_planning_failure_is_fatal() {
    let llm = Arc::new(MockLlmProvider::with_response("Sorry, I can't plan that."));
    let engine = ResearchEngine::new(
        llm.clone(),
        Arc::new(MockSearchProvider::new()),
        ResearchSettings::with_model("m"),
    );
    let callback = RecordingCallback::new();
    let err = engine.run("Q", &callback).await.unwrap_err();
    assert!(matches!(err, QuarryError::Planning(_)));
    assert_eq!(callback.phases(), vec![ResearchPhase::Planning]);
    assert_eq!(llm.requests().len(), 1);
}

#[tokio::test]
async fn test_runner_isolates_search_timeout() {
    let search = Arc::new(MockSearchProvider::with_handler(|query| {
        if query == "second query" {
            Err(SearchError::Timeout { timeout_secs: 30 })
        } else {
            Ok(MockSearchProvider::synthetic_results(query, 2))
        }
    }));
    let gap_calls = AtomicUsize::new(0);
    let llm = Arc::new(MockLlmProvider::with_handler(move |req| {
        scripted_reply(req, &gap_calls)
    }));
    let agent = SubResearchAgent::new(llm, search, "m", Guardrails::default());
    let runner = ParallelRunner::new(Arc::new(agent), Some(2))
        .with_options(ResearchOptions {
            expand_sources: Some(false),
        });
    let steps = vec![
        ResearchStep::new(1, "First", "first query", ""),
        ResearchStep::new(2, "Second", "second query", ""),
        ResearchStep::new(3, "Third", "third query", ""),
    ];
    let callback = RecordingCallback::new();

    let reports = runner.run_parallel(&steps, &callback).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].step.id, 1);
    assert_eq!(reports[0].sources.len(), 2);
    assert!(reports[1].summary.starts_with("Research failed"));
    assert!(reports[1].summary.contains("timed out after 30s"));
    assert!(reports[1].sources.is_empty());
    assert_eq!(reports[1].step.status, StepStatus::Error);
    assert_eq!(reports[2].step.id, 3);
    assert!(!reports[2].is_failed());

    let statuses = callback.last_statuses().unwrap();
    assert!(statuses[1].failed);
    assert_eq!(statuses.iter().filter(|s| s.failed).count(), 1);
}

#[test]
fn test_gap_filter_accepts_only_new_queries() {
    let plan = ResearchPlan::new(
        "Q",
        vec![
            ResearchStep::new(1, "a", "rust async runtimes", ""),
            ResearchStep::new(2, "b", "tokio work stealing", ""),
        ],
    );
    let mut executed = ExecutedQueries::from_plan(&plan);
    let before = executed.len();
    let proposed = ["Rust Async Runtimes", "smol executor", "glommio", "  smol  EXECUTOR", "monoio"]
        .iter()
        .map(|q| Gap {
            description: format!("About {q}"),
            search_query: q.to_string(),
            purpose: String::new(),
        })
        .collect();

    let kept = filter_gaps(proposed, &mut executed);

    let queries: Vec<&str> = kept.iter().map(|g| g.search_query.as_str()).collect();
    assert_eq!(queries, vec!["smol executor", "glommio", "monoio"]);
    assert_eq!(executed.len(), before + 3);
}

#[tokio::test]
async fn test_no_recursion_at_depth_zero_limit() {
    let llm = Arc::new(MockLlmProvider::with_handler(|req| {
        Ok(match req.system_prompt() {
            Some(prompts::SUBTOPICS) => {
                r#"{"subtopics": [{"question": "Child topic", "searchQuery": "child"}]}"#.to_string()
            }
            Some(prompts::FOLLOWUP_QUERY) => r#"{"query": ""}"#.to_string(),
            _ => "## Key Findings\n- parent finding".to_string(),
        })
    }));
    let guardrails = Guardrails {
        max_recursion_depth: 0,
        expand_sources: false,
        ..Guardrails::default()
    };
    let agent = SubResearchAgent::new(llm.clone(), Arc::new(MockSearchProvider::new()), "m", guardrails);
    let step = ResearchStep::new(1, "Parent", "parent", "");
    let report = agent
        .research(&step, &ResearchOptions::default(), &|_| {})
        .await
        .unwrap();

    assert_eq!(report.depth, 0);
    assert!(!report.summary.contains("### Sub-topic"));
    assert_eq!(llm.count_requests_with_system(prompts::SUBTOPICS), 0);
}

#[tokio::test]
async fn test_recursion_stops_at_configured_depth() {
    let llm = Arc::new(MockLlmProvider::with_handler(|req| {
        Ok(match req.system_prompt() {
            Some(prompts::SUBTOPICS) => r#"{"subtopics": [
                {"question": "Child A", "searchQuery": "child a"},
                {"question": "Child B", "searchQuery": "child b"},
                {"question": "Child C", "searchQuery": "child c"}
            ]}"#
            .to_string(),
            Some(prompts::FOLLOWUP_QUERY) => r#"{"query": ""}"#.to_string(),
            _ => "## Key Findings\n- a finding".to_string(),
        })
    }));
    let search = Arc::new(MockSearchProvider::new());
    let guardrails = Guardrails {
        max_recursion_depth: 1,
        expand_sources: false,
        ..Guardrails::default()
    };
    let agent = SubResearchAgent::new(llm.clone(), search.clone(), "m", guardrails);
    let step = ResearchStep::new(7, "Parent", "parent", "");
    let report = agent
        .research(&step, &ResearchOptions::default(), &|_| {})
        .await
        .unwrap();

    // Only the parent proposes sub-topics; at most two are followed.
    assert_eq!(llm.count_requests_with_system(prompts::SUBTOPICS), 1);
    assert!(report.summary.contains("### Sub-topic: Child A"));
    assert!(report.summary.contains("### Sub-topic: Child B"));
    assert!(!report.summary.contains("Child C"));
    assert_eq!(search.queries(), vec!["parent", "child a", "child b"]);
    assert_eq!(report.sources.len(), 9);
    assert_eq!(report.key_insights, vec!["a finding"]);
}

#[tokio::test]
async fn test_planner_produces_contiguous_ids() {
    let steps: Vec<String> = (1..=6)
        .map(|i| format!(r#"{{"question": "Sub-question {i}?"}}"#))
        .collect();
    let llm = Arc::new(MockLlmProvider::with_response(&format!(
        "Here is the plan:\n```json\n{{\"steps\": [{}],}}\n```",
        steps.join(",")
    )));
    let plan = Planner::new(llm, "m", &Guardrails::default())
        .create_plan("What is the state of Rust async?")
        .await
        .unwrap();

    assert!((4..=7).contains(&plan.steps.len()));
    let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, (1..=6).collect::<Vec<u32>>());
    assert_eq!(plan.main_question(), "What is the state of Rust async?");
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn test_fact_check_with_no_claims_adds_nothing() {
    let llm = Arc::new(MockLlmProvider::with_response(r#"{"claims": []}"#));
    let checker = FactChecker::new(llm.clone(), "m");
    let result = checker
        .verify("# Report\nNothing specific.", &MockSearchProvider::synthetic_results("q", 3))
        .await;
    assert_eq!(result.total_claims, 0);
    assert_eq!(format_verification_markdown(&result), "");
    assert_eq!(llm.requests().len(), 1);
}

#[tokio::test]
async fn test_outcome_survives_save_and_load() {
    let engine = ResearchEngine::new(
        scripted_llm(),
        Arc::new(MockSearchProvider::new()),
        ResearchSettings::with_model("m"),
    );
    let outcome = engine
        .run("How fast is io_uring?", &RecordingCallback::new())
        .await
        .unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    outcome.save(dir.path()).unwrap();

    let loaded = ResearchOutcome::load(dir.path(), &outcome.id).unwrap().unwrap();
    assert_eq!(loaded.report, outcome.report);
    assert_eq!(loaded.plan.steps.len(), outcome.plan.steps.len());
    assert_eq!(loaded.reports.len(), outcome.reports.len());
    assert_eq!(loaded.sources, outcome.sources);
    assert_eq!(ResearchOutcome::list_sessions(dir.path()).len(), 1);
}
