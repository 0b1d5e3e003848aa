//! Backoff for the available-doubts poll and for push reconnects.
//!
//! The poll is a read, so a transient failure is retried a couple of times
//! inside one tick before the tick is reported as failed:
//!
//! - 408, 429 and 5xx responses
//! - connect and timeout errors
//!
//! Everything else, 401/403/404 and 409 included, is final on the first
//! answer. Delays grow exponentially from `initial_delay`, are capped at
//! `max_delay`, and are shortened by up to `jitter_factor` so that solvers
//! knocked offline together do not come back in lockstep. A `Retry-After`
//! of under a minute from the backend takes precedence.
//!
//! The accept call never goes through here: a repeated accept after a lost
//! response would report a race this solver had already won.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};

const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0.25 shortens each delay by up to 25%.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

/// The last transport error once the poll has given up.
#[derive(Debug)]
pub struct TransportFailure {
    pub attempts: u32,
    pub source: reqwest::Error,
}

/// Whether a poll response is worth asking again for within the same tick.
#[must_use]
pub fn is_transient(status: StatusCode) -> bool {
    match status {
        StatusCode::CONFLICT => false,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => true,
        status => status.is_server_error(),
    }
}

/// Seconds from a `Retry-After` header, if positive and under a minute.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    let delay = Duration::from_secs(secs);
    (delay > Duration::ZERO && delay < MAX_RETRY_AFTER).then_some(delay)
}

/// Delay before retry number `step + 1`.
#[must_use]
pub fn backoff_delay(step: u32, config: &RetryConfig, headers: Option<&HeaderMap>) -> Duration {
    if let Some(delay) = headers.and_then(retry_after) {
        return delay;
    }

    let exponent = step.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

/// Send the request built by `build`, retrying transient failures.
///
/// Any response that is final (success or not) is returned as `Ok`; the
/// caller maps the status.
pub async fn send_with_backoff<F>(
    build: F,
    config: &RetryConfig,
) -> Result<Response, TransportFailure>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        let can_retry = attempt < config.max_retries;
        let delay = match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || !can_retry || !is_transient(status) {
                    return Ok(response);
                }
                let delay = backoff_delay(attempt, config, Some(response.headers()));
                tracing::debug!(
                    status = %status,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Poll answered with a transient status; retrying"
                );
                delay
            }
            Err(source) => {
                if !can_retry || !(source.is_connect() || source.is_timeout()) {
                    return Err(TransportFailure {
                        attempts: attempt + 1,
                        source,
                    });
                }
                let delay = backoff_delay(attempt, config, None);
                tracing::debug!(
                    error = %source,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Poll request failed; retrying"
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
