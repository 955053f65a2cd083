//! Report synthesis.
//!
//! Combines every sub-agent report into one prompt, with a global numbered
//! source list so `[Source N]` citations resolve, and streams the model's
//! report back as text chunks.

use super::agent::SubAgentReport;
use super::prompts;
use crate::brain::LlmProvider;
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, StreamEvent};
use futures::StreamExt;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const SECTION_RULE: &str = "----------------------------------------";

/// Writes the final report from the collected research.
pub struct Synthesizer {
    llm: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: Option<usize>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request(&self, main_question: &str, reports: &[SubAgentReport]) -> CompletionRequest {
        let mut request =
            CompletionRequest::with_prompt(prompts::SYNTHESIS, synthesis_context(main_question, reports))
                .model(Some(self.model.clone()))
                .temperature(0.5);
        request.max_tokens = self.max_tokens;
        request
    }

    /// Stream the report as content chunks. Reasoning tokens are dropped.
    ///
    /// Must be called from within a tokio runtime. A provider failure arrives
    /// as the last item.
    pub fn synthesize_stream(
        &self,
        main_question: &str,
        reports: &[SubAgentReport],
    ) -> ReceiverStream<Result<String>> {
        let request = self.request(main_question, reports);
        debug!(reports = reports.len(), "Starting synthesis");
        let llm = self.llm.clone();
        let (out_tx, out_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(64);
            let producer = tokio::spawn(async move { llm.complete_streaming(request, tx).await });

            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Content(text) => {
                        if out_tx.send(Ok(text)).await.is_err() {
                            debug!("Synthesis stream dropped by consumer");
                            return;
                        }
                    }
                    StreamEvent::Reasoning(_) => {}
                    StreamEvent::Done { .. } => break,
                    StreamEvent::Error(message) => {
                        let _ = out_tx
                            .send(Err(LlmError::Streaming { message }.into()))
                            .await;
                        return;
                    }
                }
            }

            let failure = match producer.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(LlmError::Streaming {
                    message: format!("Synthesis task failed: {e}"),
                }),
            };
            if let Some(e) = failure {
                warn!(error = %e, "Synthesis stream failed");
                let _ = out_tx.send(Err(e.into())).await;
            }
        });

        ReceiverStream::new(out_rx)
    }

    /// Collect the streamed report, passing each chunk to `on_chunk` first.
    pub async fn synthesize_with(
        &self,
        main_question: &str,
        reports: &[SubAgentReport],
        on_chunk: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<String> {
        let mut stream = self.synthesize_stream(main_question, reports);
        let mut report = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            on_chunk(&chunk);
            report.push_str(&chunk);
        }
        Ok(report)
    }

    /// Collect the whole report.
    pub async fn synthesize(&self, main_question: &str, reports: &[SubAgentReport]) -> Result<String> {
        self.synthesize_with(main_question, reports, &|_| {}).await
    }
}

/// Prompt body: numbered source list followed by one section per report.
pub fn synthesis_context(main_question: &str, reports: &[SubAgentReport]) -> String {
    let mut context = format!("Main research question: {main_question}\n\n");

    context.push_str("Numbered sources (cite as [Source N]):\n");
    let mut seen = HashSet::new();
    let mut n = 0;
    for source in reports.iter().flat_map(|r| &r.sources) {
        if seen.insert(source.url.as_str()) {
            n += 1;
            let _ = writeln!(context, "[Source {n}] {} - {}", source.title, source.url);
        }
    }
    if n == 0 {
        context.push_str("(none)\n");
    }
    context.push('\n');

    for (i, report) in reports.iter().enumerate() {
        let _ = writeln!(context, "{SECTION_RULE}");
        let _ = writeln!(
            context,
            "Research area {}: {}",
            i + 1,
            report.step.question
        );
        if !report.step.purpose.trim().is_empty() {
            let _ = writeln!(context, "Purpose: {}", report.step.purpose);
        }
        let _ = writeln!(context, "{SECTION_RULE}");
        let _ = writeln!(context, "{}\n", report.summary.trim());
    }
    context
}
