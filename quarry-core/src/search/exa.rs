//! Exa search API client.
//!
//! `POST /search` for ranked results with inline contents and
//! `POST /contents` for full-text expansion of specific URLs.

use super::{SearchOptions, SearchProvider, SearchResponse, SourceResult};
use crate::config::{RetryConfig, SearchConfig};
use crate::error::SearchError;
use crate::retry::with_retry;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const EXA_BASE_URL: &str = "https://api.exa.ai";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaSearchRequest<'a> {
    query: &'a str,
    num_results: usize,
    #[serde(rename = "type")]
    search_type: &'a str,
    contents: ExaContents,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaContents {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<ExaTextConfig>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    highlights: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    summary: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaTextConfig {
    max_characters: usize,
}

#[derive(Serialize)]
struct ExaContentsRequest<'a> {
    urls: &'a [String],
    text: bool,
}

#[derive(Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    highlights: Option<Vec<String>>,
    #[serde(default)]
    summary: Option<String>,
}

impl From<ExaResult> for SourceResult {
    fn from(r: ExaResult) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        SourceResult {
            url: r.url,
            title: r.title.unwrap_or_default(),
            score: r.score.unwrap_or(0.0),
            published_date: non_empty(r.published_date),
            author: non_empty(r.author),
            text: non_empty(r.text),
            highlights: r.highlights.filter(|h| !h.is_empty()),
            summary: non_empty(r.summary),
        }
    }
}

/// Exa search provider.
pub struct ExaSearchProvider {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl ExaSearchProvider {
    /// Create a provider, resolving the API key from config or the configured env var.
    pub fn new(config: &SearchConfig, retry: RetryConfig) -> Result<Self, SearchError> {
        let api_key = match config.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            Some(key) => key.clone(),
            None => std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| SearchError::AuthFailed {
                    provider: format!("exa (env var '{}' not set)", config.api_key_env),
                })?,
        };
        Self::new_with_key(config, api_key, retry)
    }

    pub fn new_with_key(
        config: &SearchConfig,
        api_key: String,
        retry: RetryConfig,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| EXA_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            retry,
        })
    }

    fn map_http_error(
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        body: &str,
    ) -> SearchError {
        match status.as_u16() {
            401 | 403 => SearchError::AuthFailed {
                provider: "exa".to_string(),
            },
            429 => SearchError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(2),
            },
            code if code >= 500 => SearchError::ServerError {
                status: code,
                message: body.chars().take(300).collect(),
            },
            _ => SearchError::Request {
                message: format!("HTTP {}: {}", status, body.chars().take(300).collect::<String>()),
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            SearchError::Connection {
                message: e.to_string(),
            }
        } else {
            SearchError::Request {
                message: e.to_string(),
            }
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Vec<SourceResult>, SearchError> {
        let url = format!("{}{}", self.base_url, path);
        with_retry(&self.retry, || async {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());
                let text = response.text().await.unwrap_or_default();
                return Err(Self::map_http_error(status, retry_after, &text));
            }

            let text = response.text().await.map_err(|e| self.map_send_error(e))?;
            parse_response(&text)
        })
        .await
    }
}

fn parse_response(body: &str) -> Result<Vec<SourceResult>, SearchError> {
    let parsed: ExaResponse =
        serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
            message: format!("Invalid Exa response: {e}"),
        })?;
    Ok(parsed.results.into_iter().map(SourceResult::from).collect())
}

#[async_trait]
impl SearchProvider for ExaSearchProvider {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let request = ExaSearchRequest {
            query,
            num_results: options.num_results,
            search_type: &options.search_type,
            contents: ExaContents {
                text: options
                    .contents
                    .text_max_chars
                    .map(|max_characters| ExaTextConfig { max_characters }),
                highlights: options.contents.highlights,
                summary: options.contents.summary,
            },
        };
        debug!(query, num_results = options.num_results, "Exa search");
        let results = self.post("/search", &request).await?;
        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }

    async fn get_contents(&self, urls: &[String]) -> Result<Vec<SourceResult>, SearchError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = urls.len(), "Exa get_contents");
        self.post("/contents", &ExaContentsRequest { urls, text: true })
            .await
    }

    fn name(&self) -> &str {
        "exa"
    }
}
