//! OpenAI-compatible LLM provider.
//!
//! Speaks the chat completions API used by OpenRouter, OpenAI, and local
//! servers (Ollama, vLLM, LM Studio). Streaming separates answer tokens from
//! reasoning tokens (`delta.reasoning` / `delta.reasoning_content`).

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::models::{ModelInfo, parse_models_response};
use crate::retry::with_retry;
use crate::types::{CompletionRequest, CompletionResponse, Message, StreamEvent, TokenUsage};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a provider with an explicitly resolved API key.
    pub fn new_with_key(
        config: &LlmConfig,
        api_key: String,
        retry: RetryConfig,
    ) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            retry,
        })
    }

    /// Build the JSON body for a chat completion.
    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        });

        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(top_k) = request.top_k {
            body["top_k"] = json!(top_k);
        }
        if let Some(penalty) = request.frequency_penalty {
            body["frequency_penalty"] = json!(penalty);
        }
        if let Some(penalty) = request.presence_penalty {
            body["presence_penalty"] = json!(penalty);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        if let Some(effort) = request.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort.to_string() });
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    /// Parse an OpenAI-format response body into a CompletionResponse.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let resp_model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(CompletionResponse {
            message: Message::assistant(content),
            usage: parse_usage(body.get("usage")),
            model: resp_model,
            finish_reason,
        })
    }

    /// Parse a single SSE data line. Returns the parsed JSON if valid.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    /// Turn one SSE chunk into stream events.
    fn chunk_events(data: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(delta) = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
        {
            let reasoning = delta
                .get("reasoning")
                .or_else(|| delta.get("reasoning_content"))
                .and_then(|r| r.as_str());
            if let Some(text) = reasoning
                && !text.is_empty()
            {
                events.push(StreamEvent::Reasoning(text.to_string()));
            }
            if let Some(text) = delta.get("content").and_then(|c| c.as_str())
                && !text.is_empty()
            {
                events.push(StreamEvent::Content(text.to_string()));
            }
        }
        if let Some(message) = data
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            events.push(StreamEvent::Error(message.to_string()));
        }
        events
    }

    /// Map an HTTP status code to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => LlmError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            code if code >= 500 => LlmError::ServerError {
                status: code,
                message: body.chars().take(500).collect(),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body.chars().take(500).collect::<String>()),
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            LlmError::Connection {
                message: e.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {e}"),
            }
        }
    }

    /// Send a chat request, returning the response only if the status is a success.
    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, retry_after, &text));
        }
        Ok(response)
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => OPENAI_BASE_URL,
        _ => OPENROUTER_BASE_URL,
    }
}

/// Splits a byte stream into lines. Only complete lines are decoded, so a
/// multi-byte character split across network chunks stays intact.
#[derive(Debug, Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_usage(usage: Option<&Value>) -> TokenUsage {
    TokenUsage {
        input_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as usize,
        output_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as usize,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request, false);
        debug!(model = %body["model"], "Sending completion request");

        with_retry(&self.retry, || async {
            let response = self.send(&body).await?;
            let text = response.text().await.map_err(|e| self.map_send_error(e))?;
            let json: Value = serde_json::from_str(&text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;
            Self::parse_response(&json, &self.model)
        })
        .await
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let body = self.request_body(&request, true);
        debug!(model = %body["model"], "Sending streaming completion request");

        // Only connection setup is retried; a stream that breaks mid-way is an error.
        let response = with_retry(&self.retry, || self.send(&body)).await?;

        let mut usage = TokenUsage::default();
        let mut lines = SseLines::default();
        let mut bytes = response.bytes_stream();

        'stream: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Streaming {
                        message: format!("Failed to read stream: {e}"),
                    }
                }
            })?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line() {
                let line = line.trim();
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                if line == "data: [DONE]" {
                    break 'stream;
                }
                let Some(data) = Self::parse_sse_line(line) else {
                    continue;
                };
                if let Some(u) = data.get("usage").filter(|u| !u.is_null()) {
                    usage = parse_usage(Some(u));
                }
                for event in Self::chunk_events(&data) {
                    if let StreamEvent::Error(message) = &event {
                        return Err(LlmError::Streaming {
                            message: message.clone(),
                        });
                    }
                    if tx.send(event).await.is_err() {
                        debug!("Stream receiver dropped");
                        return Ok(());
                    }
                }
            }
        }

        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let url = format!("{}/models", self.base_url);
        with_retry(&self.retry, || async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;
            let status = response.status();
            if !status.is_success() {
                let retry_after = retry_after_header(&response);
                let text = response.text().await.unwrap_or_default();
                return Err(Self::map_http_error(status, retry_after, &text));
            }
            let body: Value = response.json().await.map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in models response: {e}"),
            })?;
            parse_models_response(&body)
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
