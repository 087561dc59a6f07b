//! Replay of failed call attempts.

use crate::error::Result;
use std::future::Future;
use tracing::{debug, warn};

/// Outcome details of a replayed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Last error message if an attempt failed.
    pub last_error: Option<String>,
}

/// Run `attempt` once, then up to `retries` more times while it fails with a
/// retryable error. Each attempt is a fresh request; nothing here makes the
/// call idempotent.
pub async fn retry_call<F, Fut, T>(retries: u32, mut attempt: F) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = retries.saturating_add(1);
    let mut stats = RetryStats::default();

    loop {
        stats.attempts += 1;

        let error = match attempt().await {
            Ok(value) => {
                if stats.attempts > 1 {
                    debug!("Call succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(error.to_string());

        if !error.is_retryable() {
            return (Err(error), stats);
        }
        if stats.attempts >= max_attempts {
            if max_attempts > 1 {
                warn!(
                    "All {} attempts exhausted. Last error: {}",
                    max_attempts, error
                );
            }
            return (Err(error), stats);
        }

        warn!(
            "Attempt {}/{} failed: {}. Retrying",
            stats.attempts, max_attempts, error
        );
    }
}

/// Like [`retry_call`], dropping the stats.
pub async fn with_retries<F, Fut, T>(retries: u32, attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_call(retries, attempt).await.0
}
