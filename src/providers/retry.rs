use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::ProviderError;

pub(crate) const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Bounded retry for transient provider failures. The delay between attempts
/// is fixed; a longer `Retry-After` from the server wins. Only the server's
/// value is capped at [`RATE_LIMIT_MAX_DELAY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(retry_after) => self.backoff.max(retry_after.min(RATE_LIMIT_MAX_DELAY)),
            None => self.backoff,
        }
    }
}

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
        || lower.contains("resource exhausted")
        || lower.contains("quota")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    None
}

/// Turns a non-success HTTP answer into a transient or permanent error.
pub(crate) fn classify_failure(
    provider: &'static str,
    status: StatusCode,
    body: &str,
    detail: Option<String>,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = detail.unwrap_or_else(|| body.to_string());
    if is_rate_limited(status, body) {
        ProviderError::RateLimited {
            provider,
            status: status.as_u16(),
            message,
            retry_after,
        }
    } else {
        ProviderError::Api {
            provider,
            status: status.as_u16(),
            message,
        }
    }
}

pub(crate) async fn wait_with_backoff(
    chunk_id: usize,
    attempt: u32,
    max_retries: u32,
    wait: Duration,
    cause: &ProviderError,
) {
    warn!(
        chunk = chunk_id,
        "{}; retrying in {:.1}s (retry {}/{})",
        retry_reason(cause),
        wait.as_secs_f32(),
        attempt,
        max_retries
    );
    sleep(wait).await;
}

fn retry_reason(cause: &ProviderError) -> String {
    match cause {
        ProviderError::RateLimited { provider, status, .. } => {
            format!("{} rate limited (status {})", provider, status)
        }
        ProviderError::Transport { provider, source } if source.is_timeout() => {
            format!("{} call timed out", provider)
        }
        ProviderError::Transport { provider, source } if source.is_connect() => {
            format!("{} connection failed", provider)
        }
        other => format!("transient model failure: {}", other),
    }
}
