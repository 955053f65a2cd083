//! Language model provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic chat completions (full and
//! streaming with a separate reasoning channel), a usage-metering decorator, and
//! a scriptable mock provider for tests.

use crate::error::LlmError;
use crate::providers::models::ModelInfo;
use crate::types::{
    CompletionRequest, CompletionResponse, CostEstimate, Message, StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Trait for LLM providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending content and reasoning events to the channel.
    ///
    /// Implementations send `StreamEvent::Done` last on success.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// List the models this provider can serve.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(Vec::new())
    }

    /// Return the default model name.
    fn model_name(&self) -> &str;
}

/// Collect a streaming completion into its content text, forwarding reasoning
/// fragments to `on_reasoning` as they arrive.
///
/// Reasoning is never part of the returned text.
pub async fn collect_streaming(
    provider: Arc<dyn LlmProvider>,
    request: CompletionRequest,
    on_reasoning: &(dyn Fn(&str) + Send + Sync),
) -> Result<String, LlmError> {
    let (tx, mut rx) = mpsc::channel(64);
    let producer = tokio::spawn(async move { provider.complete_streaming(request, tx).await });

    let mut content = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Content(text) => content.push_str(&text),
            StreamEvent::Reasoning(text) => on_reasoning(&text),
            StreamEvent::Done { .. } => break,
            StreamEvent::Error(message) => return Err(LlmError::Streaming { message }),
        }
    }

    match producer.await {
        Ok(result) => result?,
        Err(e) => {
            return Err(LlmError::Streaming {
                message: format!("Streaming task failed: {e}"),
            });
        }
    }
    Ok(content)
}

/// Wraps a provider and accumulates token usage across every call.
pub struct MeteredProvider {
    inner: Arc<dyn LlmProvider>,
    usage: Arc<Mutex<TokenUsage>>,
}

impl MeteredProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self {
            inner,
            usage: Arc::new(Mutex::new(TokenUsage::default())),
        }
    }

    /// Total usage recorded so far.
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Price the recorded usage with the pricing of `model`, if known.
    pub fn estimate_cost(&self, model: &ModelInfo) -> CostEstimate {
        CostEstimate::from_usage(
            &self.usage(),
            model.pricing.prompt,
            model.pricing.completion,
        )
    }

    fn record(&self, usage: &TokenUsage) {
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accumulate(usage);
    }
}

#[async_trait]
impl LlmProvider for MeteredProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self.inner.complete(request).await?;
        self.record(&response.usage);
        Ok(response)
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        // Intercept Done events to capture usage, forward everything else.
        let (inner_tx, mut inner_rx) = mpsc::channel(64);
        let inner = self.inner.clone();
        let producer = tokio::spawn(async move { inner.complete_streaming(request, inner_tx).await });

        while let Some(event) = inner_rx.recv().await {
            if let StreamEvent::Done { usage } = &event {
                self.record(usage);
            }
            if tx.send(event).await.is_err() {
                debug!("Stream receiver dropped; stopping metered forward");
                break;
            }
        }
        // Unblocks the producer if we stopped forwarding early.
        drop(inner_rx);

        match producer.await {
            Ok(result) => result,
            Err(e) => Err(LlmError::Streaming {
                message: format!("Streaming task failed: {e}"),
            }),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        self.inner.list_models().await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Computes a reply for a request. Used by `MockLlmProvider::with_handler`.
pub type MockHandler = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;

/// A mock LLM provider for testing and development.
///
/// Replies come from the handler if one is set, otherwise from the queue, otherwise
/// a fixed placeholder. Every request is recorded.
pub struct MockLlmProvider {
    model: String,
    handler: Option<Box<MockHandler>>,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    reasoning: Option<String>,
    models: Vec<ModelInfo>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            handler: None,
            responses: Mutex::new(VecDeque::new()),
            reasoning: None,
            models: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider whose replies are computed from each request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    /// Emit this text as reasoning before the content when streaming.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Models returned by `list_models`.
    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }

    /// Queue a reply to be returned by the next call.
    pub fn queue_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(text.into()));
    }

    /// Queue an error to be returned by the next call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests whose system prompt equals `system_prompt`.
    pub fn count_requests_with_system(&self, system_prompt: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.system_prompt() == Some(system_prompt))
            .count()
    }

    fn reply(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(handler) = &self.handler {
            return handler(request);
        }
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok("I'm a mock LLM. No queued responses available.".to_string()))
    }

    fn mock_usage(request: &CompletionRequest, text: &str) -> TokenUsage {
        // ~4 chars per token
        TokenUsage {
            input_tokens: request
                .messages
                .iter()
                .map(|m| m.content.len() / 4)
                .sum::<usize>()
                + 10,
            output_tokens: text.len() / 4 + 1,
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let text = self.reply(&request)?;
        Ok(CompletionResponse {
            usage: Self::mock_usage(&request, &text),
            message: Message::assistant(text),
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let text = self.reply(&request)?;
        if let Some(reasoning) = &self.reasoning {
            for word in reasoning.split_inclusive(' ') {
                let _ = tx.send(StreamEvent::Reasoning(word.to_string())).await;
            }
        }
        for word in text.split_inclusive(' ') {
            let _ = tx.send(StreamEvent::Content(word.to_string())).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: Self::mock_usage(&request, &text),
            })
            .await;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(self.models.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::models::ModelPricing;

    #[tokio::test]
    async fn test_mock_queue_then_default() {
        let provider = MockLlmProvider::new();
        provider.queue_response("first");
        provider.queue_error(LlmError::Timeout { timeout_secs: 5 });

        let first = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(first.text(), "first");
        assert!(provider.complete(CompletionRequest::default()).await.is_err());
        let fallback = provider.complete(CompletionRequest::default()).await.unwrap();
        assert!(fallback.text().contains("mock LLM"));
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_handler_sees_request() {
        let provider = MockLlmProvider::with_handler(|req| {
            Ok(format!("echo: {}", req.last_user_message().unwrap_or("")))
        });
        let resp = provider
            .complete(CompletionRequest::with_prompt("sys", "ping"))
            .await
            .unwrap();
        assert_eq!(resp.text(), "echo: ping");
        assert_eq!(provider.count_requests_with_system("sys"), 1);
    }

    #[tokio::test]
    async fn test_collect_streaming_separates_reasoning() {
        let provider: Arc<dyn LlmProvider> = Arc::new(
            MockLlmProvider::with_response("{\"answer\": 42}").with_reasoning("thinking hard"),
        );
        let reasoning = Mutex::new(String::new());
        let content = collect_streaming(provider, CompletionRequest::default(), &|r| {
            reasoning.lock().unwrap().push_str(r)
        })
        .await
        .unwrap();
        assert_eq!(content, "{\"answer\": 42}");
        assert_eq!(reasoning.lock().unwrap().as_str(), "thinking hard");
    }

    #[tokio::test]
    async fn test_metered_provider_accumulates_usage() {
        let inner: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::with_response("four"));
        let metered = Arc::new(MeteredProvider::new(inner));

        metered.complete(CompletionRequest::default()).await.unwrap();
        let after_one = metered.usage();
        assert!(after_one.output_tokens > 0);

        let as_dyn: Arc<dyn LlmProvider> = metered.clone();
        collect_streaming(as_dyn, CompletionRequest::default(), &|_| {})
            .await
            .unwrap();
        let after_two = metered.usage();
        assert_eq!(after_two.output_tokens, after_one.output_tokens * 2);
    }

    /// Streams many chunks and stops as soon as the receiver goes away.
    struct ChattyProvider;

    #[async_trait]
    impl LlmProvider for ChattyProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::ApiRequest {
                message: "streaming only".into(),
            })
        }

        async fn complete_streaming(
            &self,
            _request: CompletionRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), LlmError> {
            for i in 0..500 {
                if tx.send(StreamEvent::Content(format!("chunk {i} "))).await.is_err() {
                    return Ok(());
                }
            }
            let _ = tx
                .send(StreamEvent::Done {
                    usage: TokenUsage::default(),
                })
                .await;
            Ok(())
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
            Ok(Vec::new())
        }

        fn model_name(&self) -> &str {
            "chatty"
        }
    }

    #[tokio::test]
    async fn test_metered_stream_returns_when_receiver_dropped() {
        let metered = MeteredProvider::new(Arc::new(ChattyProvider));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            metered.complete_streaming(CompletionRequest::default(), tx),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_metered_cost_estimate() {
        let inner: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::with_response("abcdefgh"));
        let metered = MeteredProvider::new(inner);
        metered.complete(CompletionRequest::default()).await.unwrap();
        let model = ModelInfo {
            id: "m".into(),
            name: "m".into(),
            context_length: Some(8_000),
            pricing: ModelPricing {
                prompt: 0.0,
                completion: 1.0,
            },
            supported_parameters: None,
        };
        let cost = metered.estimate_cost(&model);
        assert_eq!(cost.input_cost, 0.0);
        assert_eq!(cost.output_cost, metered.usage().output_tokens as f64);
    }
}
