//! Bounded parallel execution of research steps.
//!
//! A fixed number of workers share an atomic cursor and claim steps until the
//! batch is exhausted, so every step runs exactly once. Workers are futures
//! joined on the calling task. Results are reassembled by index, and a step
//! whose research fails becomes a degraded report instead of aborting the batch.

use super::agent::{ResearchOptions, StatusSink, SubAgentReport, SubResearchAgent};
use super::plan::{ResearchPlan, ResearchStep, StepStatus};
use super::session::ResearchCallback;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Live progress of one step in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Position of the step in the batch.
    pub index: usize,
    pub question: String,
    /// Latest progress message.
    pub status: String,
    pub complete: bool,
    pub sources: usize,
    pub failed: bool,
}

impl AgentStatus {
    fn pending(index: usize, question: &str) -> Self {
        Self {
            index,
            question: question.to_string(),
            status: "Waiting...".to_string(),
            complete: false,
            sources: 0,
            failed: false,
        }
    }
}

/// Something that can research a single step.
#[async_trait]
pub trait StepResearcher: Send + Sync {
    async fn research_step(
        &self,
        step: &ResearchStep,
        options: &ResearchOptions,
        status: &StatusSink<'_>,
    ) -> Result<SubAgentReport>;
}

#[async_trait]
impl StepResearcher for SubResearchAgent {
    async fn research_step(
        &self,
        step: &ResearchStep,
        options: &ResearchOptions,
        status: &StatusSink<'_>,
    ) -> Result<SubAgentReport> {
        self.research(step, options, status).await
    }
}

/// Runs batches of steps through a bounded worker pool.
pub struct ParallelRunner {
    researcher: Arc<dyn StepResearcher>,
    concurrency: Option<usize>,
    options: ResearchOptions,
}

impl ParallelRunner {
    /// `concurrency` of `None` runs one worker per step.
    pub fn new(researcher: Arc<dyn StepResearcher>, concurrency: Option<usize>) -> Self {
        Self {
            researcher,
            concurrency,
            options: ResearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of workers used for a batch of `batch_len` steps.
    pub fn pool_size(&self, batch_len: usize) -> usize {
        self.concurrency
            .unwrap_or(batch_len)
            .max(1)
            .min(batch_len)
    }

    /// Research every step and return one report per step, in input order.
    pub async fn run_parallel(
        &self,
        steps: &[ResearchStep],
        callback: &dyn ResearchCallback,
    ) -> Vec<SubAgentReport> {
        let total = steps.len();
        if total == 0 {
            return Vec::new();
        }
        let pool = self.pool_size(total);
        debug!(steps = total, workers = pool, "Running research batch");

        let slots = Mutex::new(
            steps
                .iter()
                .enumerate()
                .map(|(i, s)| AgentStatus::pending(i, &s.question))
                .collect::<Vec<_>>(),
        );
        let cursor = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        callback.on_status_update(&snapshot(&slots));

        let (slots, cursor, completed) = (&slots, &cursor, &completed);
        let workers = (0..pool).map(|_| async move {
            let mut finished = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    break;
                }
                let step = &steps[index];
                update_slot(slots, callback, index, |s| s.status = "Starting...".to_string());

                let sink = |message: &str| {
                    update_slot(slots, callback, index, |s| s.status = message.to_string())
                };
                let report = match self
                    .researcher
                    .research_step(step, &self.options, &sink)
                    .await
                {
                    Ok(report) => {
                        update_slot(slots, callback, index, |s| {
                            s.complete = true;
                            s.sources = report.sources.len();
                            s.status = format!("Done ({} sources)", report.sources.len());
                        });
                        report
                    }
                    Err(e) => {
                        warn!(step = step.id, error = %e, "Step research failed");
                        let message = e.to_string();
                        update_slot(slots, callback, index, |s| {
                            s.complete = true;
                            s.failed = true;
                            s.status = format!("Failed: {message}");
                        });
                        SubAgentReport::failed(step, &message)
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                callback.on_progress(done, total);
                finished.push((index, report));
            }
            finished
        });

        let mut results: Vec<Option<SubAgentReport>> = vec![None; total];
        for (index, report) in join_all(workers).await.into_iter().flatten() {
            results[index] = Some(report);
        }

        results
            .into_iter()
            .zip(steps)
            .map(|(report, step)| {
                report.unwrap_or_else(|| SubAgentReport::failed(step, "step was never scheduled"))
            })
            .collect()
    }
}

/// Write each report's outcome back into the matching plan step.
pub fn record_results(plan: &mut ResearchPlan, reports: &[SubAgentReport]) {
    for report in reports {
        if let Some(step) = plan.step_mut(report.step.id) {
            step.status = if report.is_failed() {
                StepStatus::Error
            } else {
                StepStatus::Complete
            };
            if report.step.results.is_some() {
                step.results = report.step.results.clone();
            }
        }
    }
}

fn snapshot(slots: &Mutex<Vec<AgentStatus>>) -> Vec<AgentStatus> {
    slots.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Apply `change` to one slot and push a snapshot of all slots.
fn update_slot(
    slots: &Mutex<Vec<AgentStatus>>,
    callback: &dyn ResearchCallback,
    index: usize,
    change: impl FnOnce(&mut AgentStatus),
) {
    let snapshot = {
        let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut guard[index]);
        guard.clone()
    };
    callback.on_status_update(&snapshot);
}
