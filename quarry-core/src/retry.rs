//! Exponential backoff retry for transient provider failures.
//!
//! Shared by the LLM and search clients. Rate limiting, 5xx responses,
//! timeouts and connection failures are retried; everything else returns
//! immediately.

use crate::config::RetryConfig;
use crate::error::{LlmError, SearchError};
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient or permanent.
pub trait Transient {
    /// Whether retrying the same request could succeed.
    fn is_transient(&self) -> bool;

    /// Server-requested delay before the next attempt, in seconds.
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::ServerError { .. }
                | LlmError::Streaming { .. }
                | LlmError::Connection { .. }
                | LlmError::Timeout { .. }
        )
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl Transient for SearchError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::RateLimited { .. }
                | SearchError::ServerError { .. }
                | SearchError::Connection { .. }
                | SearchError::Timeout { .. }
        )
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SearchError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Execute an async operation with exponential backoff retry on transient errors.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff<E: Transient>(config: &RetryConfig, attempt: u32, err: &E) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err.retry_after_secs() {
        Some(secs) => secs.saturating_mul(1000).min(config.max_backoff_ms).max(computed),
        None => computed,
    }
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        let jitter = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_no_jitter() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1_000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2_000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4_000);
        assert_eq!(compute_exponential_backoff(&config, 10), 30_000);
    }

    #[test]
    fn test_backoff_with_jitter_in_range() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let ms = compute_exponential_backoff(&config, 1);
            assert!((2_000..=2_500).contains(&ms));
        }
    }

    #[test]
    fn test_rate_limit_backoff_respects_retry_after() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        let err = LlmError::RateLimited {
            retry_after_secs: 7,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 7_000);
    }

    #[test]
    fn test_huge_retry_after_is_capped() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        let err = SearchError::RateLimited {
            retry_after_secs: u64::MAX,
        };
        assert_eq!(compute_backoff(&config, 0, &err), config.max_backoff_ms);
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            LlmError::ServerError {
                status: 502,
                message: String::new()
            }
            .is_transient()
        );
        assert!(LlmError::Timeout { timeout_secs: 1 }.is_transient());
        assert!(
            !LlmError::AuthFailed {
                provider: "x".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::ApiRequest {
                message: "HTTP 400".into()
            }
            .is_transient()
        );
        assert!(SearchError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            !SearchError::Request {
                message: "HTTP 404".into()
            }
            .is_transient()
        );
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, LlmError> = with_retry(&fast_config(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LlmError::Connection {
                    message: "reset".into(),
                })
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SearchError> = with_retry(&fast_config(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SearchError::Timeout { timeout_secs: 1 })
        })
        .await;
        assert!(matches!(result, Err(SearchError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retry(&fast_config(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::AuthFailed {
                provider: "openrouter".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
