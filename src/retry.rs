use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Errors that know whether a repeat of the same request could succeed.
///
/// Only transport-level trouble (rate limiting, server errors, dropped
/// connections) should answer `true`. Rejections such as a refused cursor
/// must surface immediately so the sync engine can classify them.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff with jitter for outbound HTTP calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Disable retries entirely.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `min(base * 2^retry, max) + jitter(0..base)`, in milliseconds.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. `label` names the request in log lines.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_retryable() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_retry(attempt);
                attempt += 1;
                tracing::warn!(
                    request = label,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
