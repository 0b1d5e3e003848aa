//! Transport adapters for the EduFoyer backend.
//!
//! # Architecture
//!
//! Two unreliable signal sources feed the availability reconciler:
//!
//! - [`rest`] - request/response calls: the available-doubts poll and the accept call
//! - [`push`] - a long-lived Server-Sent-Events stream carrying `doubt:available`
//!   and `doubt:assigned` events
//!
//! The reconciler talks to the REST side through the [`DoubtApi`] trait so it
//! can run against an in-memory fake in tests. Push events arrive over a
//! [`tokio::sync::mpsc`] channel as [`PushEvent`] values.
//!
//! # Error Handling
//!
//! Malformed payloads (from either source) are dropped and logged here, at
//! the adapter boundary; the reconciler only ever sees validated
//! [`AvailableDoubt`](edufoyer_types::AvailableDoubt) values, plus the ids of
//! listed poll entries that failed validation. Transport failures are
//! returned as [`FetchError`] / [`AcceptError`] values and never panic.

pub mod push;
pub mod rest;
pub mod retry;
mod sse;

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use edufoyer_types::{AcceptError, AuthToken, DoubtId, PollList, SessionJoin};
use thiserror::Error;
use url::Url;

pub use edufoyer_types;
pub use push::{PushEvent, PushOptions, spawn_push_listener};
pub use rest::HttpDoubtApi;

pub const AVAILABLE_DOUBTS_PATH: &str = "/api/doubts/available";
pub const ACCEPT_DOUBT_PATH: &str = "/api/doubts/accept";
pub const SOLVER_STREAM_PATH: &str = "/api/solver/stream";

const CONNECT_TIMEOUT_SECS: u64 = 15;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Boxed future returned by [`DoubtApi`] methods.
pub type ApiFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request/response side of the backend, as the reconciler needs it.
pub trait DoubtApi: Send + Sync {
    /// Fetch the full list of currently available doubts.
    ///
    /// Malformed entries are dropped by the implementation; a partially
    /// malformed list is still `Ok`, with the ids it could read from the
    /// dropped entries in [`PollList::unreadable`].
    fn poll_available(&self) -> ApiFut<'_, Result<PollList, FetchError>>;

    /// Claim a doubt for this solver.
    fn accept_doubt<'a>(&'a self, id: &'a DoubtId)
    -> ApiFut<'a, Result<SessionJoin, AcceptError>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not authorized; re-authentication required")]
    Unauthorized,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("invalid backend URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("bearer token is empty")]
    EmptyToken,
}

/// Backend location plus credentials.
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    base_url: String,
    token: AuthToken,
}

impl BackendEndpoint {
    pub fn new(base_url: &str, token: AuthToken) -> Result<Self, ClientConfigError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|e| ClientConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
        if token.is_empty() {
            return Err(ClientConfigError::EmptyToken);
        }

        Ok(Self {
            base_url: trimmed.to_string(),
            token,
        })
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn token(&self) -> &AuthToken {
        &self.token
    }
}

/// Shared HTTP client.
///
/// No overall request timeout is configured here because the push stream is
/// long-lived; REST calls set a per-request timeout instead.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build configured HTTP client: {e}. Using defaults.");
            reqwest::Client::new()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_static(concat!("edufoyer-solver/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
