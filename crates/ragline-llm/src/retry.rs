use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_SECS: u64 = 30;

/// Exponential backoff for the given zero-based attempt, capped at 30s.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor))
        .min(Duration::from_secs(MAX_BACKOFF_SECS))
}

/// Parse the `Retry-After` header value as seconds, falling back to exponential backoff.
pub(crate) fn retry_delay(response: &reqwest::Response, attempt: u32) -> Duration {
    if let Some(val) = response.headers().get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Duration::from_secs(secs.min(MAX_BACKOFF_SECS));
    }
    backoff_delay(attempt)
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502..=504)
}

/// Send an HTTP request, retrying up to `max_retries` times on rate limiting,
/// gateway errors and connection failures.
///
/// `f` must build and send a fresh request on every call. Returns the first
/// non-transient `Response` for further processing by the caller; its status may
/// still be an error such as 401.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` / `LlmError::ServiceUnavailable` once all attempts
/// are exhausted, or the underlying `reqwest::Error` wrapped as `LlmError::Http`.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &'static str,
    max_retries: u32,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = match f().await {
            Ok(response) => response,
            Err(e) if (e.is_connect() || e.is_timeout()) && attempt < max_retries => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    provider,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            Err(e) => return Err(LlmError::Http(e)),
        };

        let status = response.status();
        if !is_transient(status) {
            return Ok(response);
        }
        if attempt >= max_retries {
            return Err(LlmError::from_status(provider, status.as_u16()));
        }

        let delay = retry_delay(&response, attempt);
        tracing::warn!(
            provider,
            status = status.as_u16(),
            attempt = attempt + 1,
            max_retries,
            delay_ms = delay.as_millis(),
            "transient API error, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
