pub mod robots;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use std::time::Duration;

pub use robots::RobotsCache;

/// Browser-like default UA; override with `CRAWLER_USER_AGENT` to include
/// contact info.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/128.0.0.0 Safari/537.36";

pub fn user_agent() -> String {
    std::env::var("CRAWLER_USER_AGENT")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Shared retry policy for outbound requests: exponential backoff on
/// connection errors, 429 and 5xx, honoring `Retry-After` when present.
/// Attempts are unit-local (one candidate, one discovery window), never
/// global.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_sec: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs_f64(backoff_base_sec.max(0.0)),
        }
    }

    fn exponential(&self) -> backoff::ExponentialBackoff {
        // max_elapsed_time bounds the retry loop to roughly the sum of the
        // per-attempt delays, since ExponentialBackoff has no attempt counter.
        let budget = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(self.max_attempts));
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff_base.max(Duration::from_millis(1)))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(budget))
            .build()
    }
}

/// Response payload after the retry loop settled. Non-retryable statuses
/// (404, 403, ...) are returned as-is; callers decide what a failure means.
#[derive(Debug)]
pub struct HttpBody {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// GET (or any idempotent request the builder produces) with the shared
/// retry policy applied.
pub async fn send_with_retry<F>(policy: &RetryPolicy, build: F) -> Result<HttpBody, HttpError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    retry(policy.exponential(), || async {
        let response = build().send().await.map_err(|e| {
            if e.is_builder() {
                backoff::Error::permanent(HttpError::Fatal(e.to_string()))
            } else {
                backoff::Error::transient(HttpError::Transient(e.to_string()))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(match retry_after(response.headers()) {
                Some(wait) => backoff::Error::retry_after(HttpError::RateLimited, wait),
                None => backoff::Error::transient(HttpError::RateLimited),
            });
        }
        if matches!(status.as_u16(), 500 | 502 | 503 | 504) {
            return Err(backoff::Error::transient(HttpError::Transient(format!(
                "http {status}"
            ))));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| backoff::Error::transient(HttpError::Transient(e.to_string())))?
            .to_vec();

        Ok(HttpBody {
            status,
            content_type,
            bytes,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_has_browser_shape() {
        assert!(DEFAULT_USER_AGENT.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn policy_bounds_elapsed_time() {
        let policy = RetryPolicy::new(3, 5.0);
        let backoff = policy.exponential();
        assert_eq!(
            backoff.max_elapsed_time,
            Some(Duration::from_secs(5) * 8)
        );
        assert_eq!(backoff.initial_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        let policy = RetryPolicy::new(0, 1.0);
        assert_eq!(policy.max_attempts, 1);
    }
}
