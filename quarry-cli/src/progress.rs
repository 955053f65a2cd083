//! Plain-text progress reporting on stderr.

use quarry_core::research::{AgentStatus, ResearchCallback, ResearchPhase, ResearchPlan};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Prints phases and batch progress to stderr. When `stream_report` is set,
/// report chunks go straight to stdout.
pub struct StderrProgress {
    stream_report: bool,
    streamed: AtomicUsize,
    finished: Mutex<Vec<bool>>,
}

impl StderrProgress {
    pub fn new(stream_report: bool) -> Self {
        Self {
            stream_report,
            streamed: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Bytes of the report already written to stdout.
    pub fn streamed_bytes(&self) -> usize {
        self.streamed.load(Ordering::SeqCst)
    }
}

impl ResearchCallback for StderrProgress {
    fn on_phase_change(&self, phase: ResearchPhase) {
        if phase != ResearchPhase::Complete {
            eprintln!("==> {phase}");
        }
    }

    fn on_plan_ready(&self, plan: &ResearchPlan) {
        for step in &plan.steps {
            eprintln!("  {}. {}", step.id, step.question);
        }
    }

    fn on_status_update(&self, statuses: &[AgentStatus]) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        if finished.len() != statuses.len() {
            *finished = vec![false; statuses.len()];
        }
        for status in statuses {
            if status.complete && !finished[status.index] {
                finished[status.index] = true;
                let mark = if status.failed { "x" } else { "+" };
                eprintln!("  [{mark}] {} ({})", status.question, status.status);
            }
        }
    }

    fn on_progress(&self, completed: usize, total: usize) {
        if completed == total {
            eprintln!("  {completed}/{total} steps done");
        }
    }

    fn on_followup_round(&self, round: usize, new_queries: &[String]) {
        eprintln!("  Round {round}: {} new queries", new_queries.len());
        for query in new_queries {
            eprintln!("    - {query}");
        }
    }

    fn on_reasoning(&self, text: &str) {
        eprint!("{text}");
    }

    fn on_synthesis_chunk(&self, chunk: &str) {
        if !self.stream_report {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
        self.streamed.fetch_add(chunk.len(), Ordering::SeqCst);
    }
}
