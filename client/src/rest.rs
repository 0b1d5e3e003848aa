//! REST adapter: available-doubts poll and accept.

use std::time::Duration;

use edufoyer_types::{AcceptError, AvailableDoubt, DoubtId, DoubtPayload, PollList, SessionJoin};
use serde_json::Value;

use crate::retry::{RetryConfig, send_with_backoff};
use crate::{
    ACCEPT_DOUBT_PATH, AVAILABLE_DOUBTS_PATH, ApiFut, BackendEndpoint, DoubtApi, FetchError,
    read_capped_error_body,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`DoubtApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpDoubtApi {
    client: reqwest::Client,
    endpoint: BackendEndpoint,
    request_timeout: Duration,
    poll_retry: RetryConfig,
}

impl HttpDoubtApi {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: BackendEndpoint) -> Self {
        Self {
            client,
            endpoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_retry(mut self, retry: RetryConfig) -> Self {
        self.poll_retry = retry;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.endpoint.token().expose_secret())
            .timeout(self.request_timeout)
    }

    async fn fetch_available(&self) -> Result<PollList, FetchError> {
        let url = self.endpoint.url(AVAILABLE_DOUBTS_PATH);
        let response = send_with_backoff(|| self.authorized(self.client.get(&url)), &self.poll_retry)
            .await
            .map_err(|failure| {
                FetchError::Network(format!(
                    "request failed after {} attempts: {}",
                    failure.attempts, failure.source
                ))
            })?;

        let status = response.status().as_u16();
        if matches!(status, 401 | 403) {
            return Err(FetchError::Unauthorized);
        }
        if !response.status().is_success() {
            let body = read_capped_error_body(response).await;
            return Err(FetchError::Http { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        decode_available_list(&body)
    }

    async fn post_accept(&self, id: &DoubtId) -> Result<SessionJoin, AcceptError> {
        let url = self.endpoint.url(ACCEPT_DOUBT_PATH);
        let body = serde_json::json!({ "doubtId": id.as_str() });
        // Single attempt: a retry after a lost response would see 409 for a race we won.
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AcceptError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                let payload = response
                    .bytes()
                    .await
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
                    .unwrap_or(Value::Null);
                Ok(session_join_from(id, &payload))
            }
            409 => Err(AcceptError::AlreadyAssigned),
            404 => Err(AcceptError::NotFound),
            401 | 403 => Err(AcceptError::Unauthorized),
            _ => {
                let body = read_capped_error_body(response).await;
                Err(AcceptError::Network(format!("HTTP {status}: {body}")))
            }
        }
    }
}

impl DoubtApi for HttpDoubtApi {
    fn poll_available(&self) -> ApiFut<'_, Result<PollList, FetchError>> {
        Box::pin(self.fetch_available())
    }

    fn accept_doubt<'a>(
        &'a self,
        id: &'a DoubtId,
    ) -> ApiFut<'a, Result<SessionJoin, AcceptError>> {
        Box::pin(self.post_accept(id))
    }
}

/// Decode the poll body: either a bare array or `{ "doubts": [...] }`.
///
/// Entries that fail validation are logged and skipped; the rest are kept.
/// A skipped entry whose id is still readable is reported as unreadable.
pub(crate) fn decode_available_list(body: &Value) -> Result<PollList, FetchError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("doubts")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Decode("expected a `doubts` array".to_string()))?,
        _ => {
            return Err(FetchError::Decode(
                "expected an array of doubts".to_string(),
            ));
        }
    };

    let mut list = PollList {
        doubts: Vec::with_capacity(items.len()),
        unreadable: Vec::new(),
    };
    for (index, item) in items.iter().enumerate() {
        match DoubtPayload::from_json(item).and_then(AvailableDoubt::try_from) {
            Ok(doubt) => list.doubts.push(doubt),
            Err(e) => {
                let id = DoubtPayload::listed_id(item);
                tracing::warn!(
                    index,
                    doubt_id = ?id,
                    error = %e,
                    "Dropping malformed doubt from poll response"
                );
                list.unreadable.extend(id);
            }
        }
    }
    Ok(list)
}

/// Build join details from the accept response.
///
/// Accepts the session object at the top level or under `session`. When the
/// backend sends no session id the room is named after the doubt.
pub(crate) fn session_join_from(id: &DoubtId, payload: &Value) -> SessionJoin {
    let session = payload
        .get("session")
        .filter(|v| v.is_object())
        .unwrap_or(payload);
    let field = |names: &[&str]| {
        names.iter().find_map(|name| {
            session
                .get(*name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        })
    };

    let room_name = field(&["roomName"]);
    SessionJoin {
        session_id: field(&["sessionId", "roomId"])
            .or_else(|| room_name.clone())
            .unwrap_or_else(|| id.to_string()),
        room_name,
        join_url: field(&["joinUrl", "url"]),
    }
}
