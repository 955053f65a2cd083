//! Claim verification against collected sources.
//!
//! Extracts up to ten factual claims from the report, then checks each claim
//! against the source texts one at a time until a source supports it. Claims
//! are checked concurrently. Nothing here fails the run: model errors degrade
//! to fewer claims or to `Unverified`.

use super::json::parse_model_json;
use super::prompts;
use super::sources::truncate_chars;
use crate::brain::LlmProvider;
use crate::search::SourceResult;
use crate::types::CompletionRequest;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const REPORT_PREFIX_CHARS: usize = 12_000;
const SOURCE_CHARS: usize = 3_000;
const MAX_CLAIMS: usize = 10;
const MAX_SOURCES: usize = 10;
const LISTED_UNVERIFIED: usize = 5;

/// Outcome of checking one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Verified,
    PartiallyVerified,
    Unverified,
}

impl ClaimStatus {
    fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "verified" | "supported" => ClaimStatus::Verified,
            "partially_verified" | "partial" | "partially_supported" => {
                ClaimStatus::PartiallyVerified
            }
            _ => ClaimStatus::Unverified,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ClaimStatus::Unverified)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimStatus::Verified => write!(f, "verified"),
            ClaimStatus::PartiallyVerified => write!(f, "partially verified"),
            ClaimStatus::Unverified => write!(f, "unverified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub claim: String,
    pub status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// The source that supported the claim, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    /// 0.0 to 1.0.
    pub confidence: f64,
}

impl ClaimVerification {
    fn unverified(claim: &str) -> Self {
        Self {
            claim: claim.to_string(),
            status: ClaimStatus::Unverified,
            evidence: None,
            source_url: None,
            source_title: None,
            confidence: 0.0,
        }
    }
}

/// Tallies plus per-claim details, in extraction order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub total_claims: usize,
    pub verified_count: usize,
    pub partially_verified_count: usize,
    pub unverified_count: usize,
    pub claims: Vec<ClaimVerification>,
}

impl VerificationResult {
    pub fn from_claims(claims: Vec<ClaimVerification>) -> Self {
        let count = |status| claims.iter().filter(|c| c.status == status).count();
        Self {
            total_claims: claims.len(),
            verified_count: count(ClaimStatus::Verified),
            partially_verified_count: count(ClaimStatus::PartiallyVerified),
            unverified_count: count(ClaimStatus::Unverified),
            claims,
        }
    }

    /// Verified plus partially verified.
    pub fn supported_count(&self) -> usize {
        self.verified_count + self.partially_verified_count
    }
}

#[derive(Deserialize)]
struct ClaimsReply {
    #[serde(default)]
    claims: Vec<String>,
}

#[derive(Deserialize)]
struct CheckReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Checks report claims against source text.
pub struct FactChecker {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl FactChecker {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    fn request(&self, system: &str, user: String) -> CompletionRequest {
        CompletionRequest::with_prompt(system, user)
            .model(Some(self.model.clone()))
            .temperature(0.0)
    }

    /// Extract claims from `report` and check each against `sources`.
    pub async fn verify(&self, report: &str, sources: &[SourceResult]) -> VerificationResult {
        let claims = self.extract_claims(report).await;
        if claims.is_empty() {
            return VerificationResult::default();
        }

        let usable: Vec<(&SourceResult, String)> = sources
            .iter()
            .filter_map(|s| {
                let content = s.content()?;
                (!content.trim().is_empty()).then_some((s, content))
            })
            .take(MAX_SOURCES)
            .collect();
        debug!(claims = claims.len(), sources = usable.len(), "Checking claims");

        let checks = claims.iter().map(|claim| self.check_claim(claim, &usable));
        let result = VerificationResult::from_claims(join_all(checks).await);
        info!(
            total = result.total_claims,
            verified = result.verified_count,
            partial = result.partially_verified_count,
            "Fact check complete"
        );
        result
    }

    /// Up to ten claims from the start of the report. Any failure yields none.
    pub async fn extract_claims(&self, report: &str) -> Vec<String> {
        if report.trim().is_empty() {
            return Vec::new();
        }
        let user = format!("Report:\n\n{}", truncate_chars(report, REPORT_PREFIX_CHARS));
        let response = match self
            .llm
            .complete(self.request(prompts::CLAIM_EXTRACTION, user))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Claim extraction failed");
                return Vec::new();
            }
        };
        let claims = match parse_model_json::<ClaimsReply>(response.text()) {
            Ok(reply) => reply.claims,
            Err(_) => parse_model_json::<Vec<String>>(response.text()).unwrap_or_default(),
        };
        claims
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .take(MAX_CLAIMS)
            .collect()
    }

    /// Try sources in order; the first one that supports the claim wins.
    async fn check_claim(&self, claim: &str, sources: &[(&SourceResult, String)]) -> ClaimVerification {
        for (source, content) in sources {
            let user = format!(
                "Claim: {claim}\n\nSource: {} ({})\n{}",
                source.title,
                source.url,
                truncate_chars(content, SOURCE_CHARS)
            );
            let response = match self.llm.complete(self.request(prompts::CLAIM_CHECK, user)).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(url = %source.url, error = %e, "Claim check call failed, trying next source");
                    continue;
                }
            };
            let Ok(reply) = parse_model_json::<CheckReply>(response.text()) else {
                continue;
            };
            let status = ClaimStatus::parse(&reply.status);
            if status.is_supported() {
                return ClaimVerification {
                    claim: claim.to_string(),
                    status,
                    evidence: reply.evidence.filter(|e| !e.trim().is_empty()),
                    source_url: Some(source.url.clone()),
                    source_title: Some(source.title.clone()),
                    confidence: reply.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                };
            }
        }
        ClaimVerification::unverified(claim)
    }
}

/// Markdown block appended to the report. Empty when no claims were checked.
pub fn format_verification_markdown(result: &VerificationResult) -> String {
    if result.total_claims == 0 {
        return String::new();
    }
    let mut out = format!(
        "\n\n---\n\n## Fact Check\n\n{} of {} claims supported by sources \
         ({} verified, {} partially verified, {} unverified).\n",
        result.supported_count(),
        result.total_claims,
        result.verified_count,
        result.partially_verified_count,
        result.unverified_count
    );
    let unverified: Vec<&ClaimVerification> = result
        .claims
        .iter()
        .filter(|c| c.status == ClaimStatus::Unverified)
        .take(LISTED_UNVERIFIED)
        .collect();
    if !unverified.is_empty() {
        out.push_str("\n**Claims not confirmed by the collected sources:**\n\n");
        for claim in unverified {
            out.push_str(&format!("- {}\n", claim.claim));
        }
    }
    out
}
