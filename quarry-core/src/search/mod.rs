//! Search provider abstraction.
//!
//! `SearchProvider` performs semantic web search and full-text content
//! retrieval. `ExaSearchProvider` is the HTTP implementation;
//! `MockSearchProvider` serves scripted results for tests.

pub mod exa;

use crate::config::{RetryConfig, SearchConfig};
use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub use exa::ExaSearchProvider;

/// One retrieved document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    /// Deduplication key.
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Relevance, higher is better.
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Pick the richer of two optional strings: longer wins, ties break by ordering.
fn richer_text(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(richer_string(a, b)),
        (a, b) => a.or(b),
    }
}

fn richer_string(a: String, b: String) -> String {
    if (a.chars().count(), &a) >= (b.chars().count(), &b) {
        a
    } else {
        b
    }
}

fn richer_list(a: Option<Vec<String>>, b: Option<Vec<String>>) -> Option<Vec<String>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if (a.len(), &a) >= (b.len(), &b) { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl SourceResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Merge another record for the same URL into this one.
    ///
    /// Keeps the longer text, summary, title, date and author, the longer
    /// highlight list, and the maximum score. The result does not depend on
    /// merge order, and merging the same record twice changes nothing.
    pub fn merge(&mut self, other: SourceResult) {
        debug_assert_eq!(self.url, other.url);
        let current = std::mem::take(self);
        *self = SourceResult {
            url: current.url,
            title: richer_string(current.title, other.title),
            score: current.score.max(other.score),
            published_date: richer_text(current.published_date, other.published_date),
            author: richer_text(current.author, other.author),
            text: richer_text(current.text, other.text),
            highlights: richer_list(current.highlights, other.highlights),
            summary: richer_text(current.summary, other.summary),
        };
    }

    /// Best available body text: full text, else summary, else joined highlights.
    pub fn content(&self) -> Option<String> {
        if let Some(text) = self.text.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(text.clone());
        }
        if let Some(summary) = self.summary.as_ref().filter(|s| !s.trim().is_empty()) {
            return Some(summary.clone());
        }
        self.highlights
            .as_ref()
            .filter(|h| !h.is_empty())
            .map(|h| h.join(" ... "))
    }
}

/// Which content fields the provider should return with each result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentOptions {
    /// Return page text, truncated to this many characters. `None` omits text.
    pub text_max_chars: Option<usize>,
    pub highlights: bool,
    pub summary: bool,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            text_max_chars: Some(4_000),
            highlights: true,
            summary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Provider search mode ("auto", "neural", "keyword").
    pub search_type: String,
    pub num_results: usize,
    pub contents: ContentOptions,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_type: "auto".to_string(),
            num_results: 8,
            contents: ContentOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SourceResult>,
}

/// Trait for web search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search and return ranked results.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError>;

    /// Fetch full page contents for exactly these URLs.
    async fn get_contents(&self, urls: &[String]) -> Result<Vec<SourceResult>, SearchError>;

    fn name(&self) -> &str;
}

/// Create the configured search provider.
pub fn create_search_provider(
    config: &SearchConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    match config.provider.as_str() {
        "exa" => Ok(Arc::new(ExaSearchProvider::new(config, retry.clone())?)),
        other => Err(SearchError::Request {
            message: format!("Unknown search provider '{other}'"),
        }),
    }
}

/// Computes search results for a query. Used by `MockSearchProvider::with_handler`.
pub type MockSearchHandler =
    dyn Fn(&str) -> Result<Vec<SourceResult>, SearchError> + Send + Sync;

/// Computes full contents for a URL. Used by `MockSearchProvider::with_contents`.
pub type MockContentsHandler = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A mock search provider for testing.
///
/// Without a handler every query returns three synthetic results derived from
/// the query text. Every query and content request is recorded.
pub struct MockSearchProvider {
    handler: Option<Box<MockSearchHandler>>,
    contents: Option<Box<MockContentsHandler>>,
    queries: Mutex<Vec<String>>,
    content_requests: Mutex<Vec<Vec<String>>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            handler: None,
            contents: None,
            queries: Mutex::new(Vec::new()),
            content_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<SourceResult>, SearchError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Serve full contents from `contents`; URLs it returns `None` for are omitted.
    pub fn with_contents<F>(mut self, contents: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.contents = Some(Box::new(contents));
        self
    }

    /// Synthetic results for a query: `n` sources with decreasing scores.
    pub fn synthetic_results(query: &str, n: usize) -> Vec<SourceResult> {
        let slug: String = query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        (0..n)
            .map(|i| {
                SourceResult::new(
                    format!("https://example.com/{slug}/{i}"),
                    format!("{query} (result {})", i + 1),
                )
                .with_text(format!("Snippet {} about {query}.", i + 1))
                .with_score(1.0 - i as f64 * 0.1)
            })
            .collect()
    }

    /// All queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// URL batches passed to `get_contents`, in call order.
    pub fn content_requests(&self) -> Vec<Vec<String>> {
        self.content_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());

        let mut results = match &self.handler {
            Some(handler) => handler(query)?,
            None => Self::synthetic_results(query, 3),
        };
        results.truncate(options.num_results);
        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }

    async fn get_contents(&self, urls: &[String]) -> Result<Vec<SourceResult>, SearchError> {
        self.content_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(urls.to_vec());

        Ok(urls
            .iter()
            .filter_map(|url| {
                let text = match &self.contents {
                    Some(contents) => contents(url)?,
                    None => format!("Full text of {url}. ").repeat(20),
                };
                Some(SourceResult::new(url.clone(), String::new()).with_text(text))
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
