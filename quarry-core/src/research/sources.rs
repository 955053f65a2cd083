//! Source bookkeeping for a single sub-agent run.
//!
//! `SourceMap` deduplicates search results by URL using the merge rule on
//! `SourceResult`, keeps first-seen order, and builds the bounded source
//! context that goes into the analysis prompt.

use crate::search::SourceResult;
use std::collections::{HashMap, HashSet};

/// Normalize a search query for duplicate detection: trim, collapse whitespace, lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Longest prefix of `text` with at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// URL-keyed, insertion-ordered set of sources.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    order: Vec<String>,
    entries: HashMap<String, SourceResult>,
    expanded: HashSet<String>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a source, merging with any existing record for the same URL.
    pub fn merge(&mut self, source: SourceResult) {
        if source.url.trim().is_empty() {
            return;
        }
        match self.entries.get_mut(&source.url) {
            Some(existing) => existing.merge(source),
            None => {
                self.order.push(source.url.clone());
                self.entries.insert(source.url.clone(), source);
            }
        }
    }

    pub fn merge_all(&mut self, sources: impl IntoIterator<Item = SourceResult>) {
        for source in sources {
            self.merge(source);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&SourceResult> {
        self.entries.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Sources by descending score; ties keep first-seen order.
    pub fn ranked(&self) -> Vec<&SourceResult> {
        let mut sources: Vec<&SourceResult> =
            self.order.iter().filter_map(|u| self.entries.get(u)).collect();
        sources.sort_by(|a, b| b.score.total_cmp(&a.score));
        sources
    }

    /// Owned copy of `ranked()`.
    pub fn to_ranked_vec(&self) -> Vec<SourceResult> {
        self.ranked().into_iter().cloned().collect()
    }

    /// Overlay full-text copies onto known URLs. Expanded text always wins.
    ///
    /// Returns the records that were applied; URLs not already in the map or
    /// with no text are ignored.
    pub fn apply_expanded(&mut self, expanded: Vec<SourceResult>) -> Vec<SourceResult> {
        let mut applied = Vec::new();
        for copy in expanded {
            let Some(text) = copy.text.as_ref().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let Some(entry) = self.entries.get_mut(&copy.url) else {
                continue;
            };
            entry.text = Some(text.clone());
            if entry.title.trim().is_empty() && !copy.title.trim().is_empty() {
                entry.title = copy.title.clone();
            }
            self.expanded.insert(copy.url.clone());
            applied.push(entry.clone());
        }
        applied
    }

    pub fn is_expanded(&self, url: &str) -> bool {
        self.expanded.contains(url)
    }

    /// Build the numbered source context for analysis.
    ///
    /// Each source contributes at most `expanded_chars` characters of content if
    /// it was expanded, `source_chars` otherwise. The whole context never exceeds
    /// `total_budget` characters: the source at the boundary is cut and no
    /// further sources are added.
    pub fn build_context(
        &self,
        source_chars: usize,
        expanded_chars: usize,
        total_budget: Option<usize>,
    ) -> String {
        let mut context = String::new();
        let mut used = 0usize;

        for (i, source) in self.ranked().into_iter().enumerate() {
            let limit = if self.is_expanded(&source.url) {
                expanded_chars
            } else {
                source_chars
            };
            let content = source.content().unwrap_or_default();
            let mut block = format!("[Source {}] {}\nURL: {}\n", i + 1, source.title, source.url);
            if let Some(date) = &source.published_date {
                block.push_str(&format!("Published: {date}\n"));
            }
            block.push_str(truncate_chars(&content, limit));
            block.push_str("\n\n");

            let block_chars = block.chars().count();
            match total_budget {
                Some(budget) if used + block_chars > budget => {
                    context.push_str(truncate_chars(&block, budget - used));
                    break;
                }
                _ => {
                    context.push_str(&block);
                    used += block_chars;
                }
            }
        }
        context
    }
}
