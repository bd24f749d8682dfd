//! Rate limiting and retry policy for the provider adapter.
//!
//! Implements the policy from SPEC_FULL §4.1: sleep a fixed base delay
//! before and after every call (smoothing, to avoid bursty quota
//! exhaustion), and on a transient failure (HTTP 429 or >=500) retry up
//! to `max_retries` times with exponential backoff. Every other error
//! kind propagates immediately without a retry.

use crate::error::{GmailError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Retry/backoff configuration. Mirrors `config::RateLimitConfig`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_retries: 3,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32 - 1);
        self.base_delay.mul_f64(factor)
    }
}

/// Whether an error is the kind the adapter retries: HTTP 429 or >=500.
/// Everything else (including `InvalidParameter` and non-transient
/// provider errors) propagates on the first failure.
fn is_retryable(error: &GmailError) -> bool {
    matches!(error.http_status(), Some(429) | Some(500..=599))
}

#[derive(Debug, Default)]
struct Stats {
    total_calls: u64,
    total_retries: u64,
    total_sleep: Duration,
}

/// Wraps an operation with the pre/post-call smoothing sleep and the
/// bounded exponential-backoff retry loop. One instance is shared (via
/// `Clone`) across all call sites that should obey the same policy.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RetryPolicy,
    stats: Arc<Mutex<Stats>>,
}

impl RateLimiter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    /// Run `op`, applying the smoothing sleeps and retry policy. `op` is
    /// called again on each retry; it must be idempotent from the
    /// caller's perspective (the Provider Adapter's verbs all are).
    pub async fn call<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        tokio::time::sleep(self.policy.base_delay).await;
        {
            let mut stats = self.stats.lock().await;
            stats.total_calls += 1;
            stats.total_sleep += self.policy.base_delay;
        }

        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    tokio::time::sleep(self.policy.base_delay).await;
                    let mut stats = self.stats.lock().await;
                    stats.total_sleep += self.policy.base_delay;
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.policy.max_retries || !is_retryable(&err) {
                        if is_retryable(&err) {
                            warn!(attempts = attempt + 1, "retries exhausted");
                            return Err(GmailError::ProviderFatal(err.to_string()));
                        }
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.policy.backoff_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                    {
                        let mut stats = self.stats.lock().await;
                        stats.total_retries += 1;
                        stats.total_sleep += delay;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let stats = self.stats.lock().await;
        RateLimiterStats {
            total_calls: stats.total_calls,
            total_retries: stats.total_retries,
            total_sleep: stats.total_sleep,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_calls: u64,
    pub total_retries: u64,
    pub total_sleep: Duration,
}
