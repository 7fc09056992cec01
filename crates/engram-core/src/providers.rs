//! Provider Plumbing
//!
//! Shared machinery for outbound model providers: the transient/permanent
//! failure split, exponential backoff with jitter, token estimation, and
//! the cost-accounting seam every provider call reports through.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::memory::ApiCostRecord;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure modes of an outbound provider call.
///
/// Only the first three are transient and retried; anything else surfaces
/// immediately.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("call timed out: {0}")]
    Timeout(String),
    #[error("provider failure: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Unavailable(_)
                | ProviderError::Timeout(_)
        )
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Jitter factor in [0.8, 1.2), derived from the clock's subsecond noise.
fn jitter_factor() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    0.8 + 0.4 * (nanos as f64 / 1e9)
}

/// Run `call` with bounded retries on transient failures.
///
/// Delays follow the policy's `{base, base*f, base*f², …}` schedule with a
/// jitter factor applied. Permanent failures and exhausted attempts return
/// the last error; nothing is ever fabricated on failure.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt, jitter_factor());
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(operation, attempt = attempt + 1, "provider call failed: {}", e);
                return Err(e);
            }
        }
    }
}

// ============================================================================
// COST ACCOUNTING
// ============================================================================

/// Rough token count for accounting (≈4 chars per token).
pub fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 / 4).max(1)
}

/// Sink for per-call accounting records. Implemented by the storage layer;
/// a provider call that cannot reach a sink simply goes unaccounted.
pub trait CostRecorder: Send + Sync {
    fn record_cost(&self, record: ApiCostRecord);
}

// ============================================================================
// TESTS
// ============================================================================
