//! Push channel: a Server-Sent-Events stream of doubt notifications.
//!
//! The solver opens the stream by POSTing its `registerSolver` message; the
//! backend keeps the response open and routes `doubt:available` and
//! `doubt:assigned` events for the registered subjects down it.
//!
//! Delivery is best-effort. Dropped connections are retried with backoff
//! for as long as someone holds the receiving end of the channel; anything
//! missed while disconnected is recovered by the reconciler's poll.

use std::time::Duration;

use edufoyer_types::{
    AssignedPayload, AvailableDoubt, DoubtId, DoubtPayload, PayloadError, SolverRegistration,
};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::retry::{RetryConfig, backoff_delay};
use crate::sse::{SseFrame, drain_next_event, parse_frame};
use crate::{BackendEndpoint, SOLVER_STREAM_PATH, read_capped_error_body};

pub const EVENT_DOUBT_AVAILABLE: &str = "doubt:available";
pub const EVENT_DOUBT_ASSIGNED: &str = "doubt:assigned";

const MAX_PUSH_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// What the push listener reports to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Available(AvailableDoubt),
    Assigned(DoubtId),
    Connected,
    Disconnected { reason: String },
}

#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Reconnect if nothing (data or heartbeat) arrives for this long.
    pub idle_timeout: Duration,
    /// Backoff between reconnect attempts. `max_retries` is ignored: the
    /// listener retries until its receiver goes away.
    pub reconnect: RetryConfig,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect: RetryConfig {
                max_retries: 0,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                jitter_factor: 0.25,
            },
        }
    }
}

#[derive(Debug)]
enum ConnectError {
    Unauthorized,
    Failed(String),
}

#[derive(Debug)]
enum StreamEnd {
    /// The receiving side hung up; stop for good.
    ReceiverClosed,
    Lost(String),
}

/// Spawn the push listener task.
///
/// The task exits when `tx`'s receiver is dropped or the backend rejects
/// the credentials. Aborting the returned handle also stops it.
pub fn spawn_push_listener(
    client: reqwest::Client,
    endpoint: BackendEndpoint,
    registration: SolverRegistration,
    options: PushOptions,
    tx: mpsc::Sender<PushEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_push_listener(&client, &endpoint, &registration, &options, &tx).await;
    })
}

async fn run_push_listener(
    client: &reqwest::Client,
    endpoint: &BackendEndpoint,
    registration: &SolverRegistration,
    options: &PushOptions,
    tx: &mpsc::Sender<PushEvent>,
) {
    let mut failures: u32 = 0;

    loop {
        if tx.is_closed() {
            return;
        }

        match connect(client, endpoint, registration).await {
            Ok(response) => {
                tracing::info!(
                    user_id = %registration.user_id,
                    subjects = ?registration.subjects,
                    "Push stream connected"
                );
                failures = 0;
                if tx.send(PushEvent::Connected).await.is_err() {
                    return;
                }
                match pump_stream(response, tx, options.idle_timeout).await {
                    StreamEnd::ReceiverClosed => return,
                    StreamEnd::Lost(reason) => {
                        tracing::warn!(%reason, "Push stream lost");
                        if tx.send(PushEvent::Disconnected { reason }).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(ConnectError::Unauthorized) => {
                tracing::error!("Push stream rejected credentials; not reconnecting");
                let _ = tx
                    .send(PushEvent::Disconnected {
                        reason: "unauthorized".to_string(),
                    })
                    .await;
                return;
            }
            Err(ConnectError::Failed(reason)) => {
                tracing::warn!(%reason, attempt = failures + 1, "Push stream connect failed");
                if tx.send(PushEvent::Disconnected { reason }).await.is_err() {
                    return;
                }
            }
        }

        let delay = backoff_delay(failures, &options.reconnect, None);
        failures = failures.saturating_add(1);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = tx.closed() => return,
        }
    }
}

async fn connect(
    client: &reqwest::Client,
    endpoint: &BackendEndpoint,
    registration: &SolverRegistration,
) -> Result<reqwest::Response, ConnectError> {
    let response = client
        .post(endpoint.url(SOLVER_STREAM_PATH))
        .bearer_auth(endpoint.token().expose_secret())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(registration)
        .send()
        .await
        .map_err(|e| ConnectError::Failed(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status.as_u16(), 401 | 403) {
        return Err(ConnectError::Unauthorized);
    }
    let body = read_capped_error_body(response).await;
    Err(ConnectError::Failed(format!("HTTP {status}: {body}")))
}

async fn pump_stream(
    response: reqwest::Response,
    tx: &mpsc::Sender<PushEvent>,
    idle_timeout: Duration,
) -> StreamEnd {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            () = tx.closed() => return StreamEnd::ReceiverClosed,
        };

        let Ok(next) = next else {
            return StreamEnd::Lost("push stream idle timeout".to_string());
        };
        let Some(chunk) = next else {
            return StreamEnd::Lost("push stream closed by server".to_string());
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEnd::Lost(format!("push stream error: {e}")),
        };
        buffer.extend_from_slice(&chunk);

        if buffer.len() > MAX_PUSH_BUFFER_BYTES {
            return StreamEnd::Lost("push buffer exceeded maximum size (4 MiB)".to_string());
        }

        while let Some(raw) = drain_next_event(&mut buffer) {
            if raw.is_empty() {
                continue;
            }
            let Ok(block) = std::str::from_utf8(&raw) else {
                tracing::warn!(bytes = raw.len(), "Dropping push event with invalid UTF-8");
                continue;
            };
            let Some(frame) = parse_frame(block) else {
                continue;
            };

            match decode_push_frame(&frame) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return StreamEnd::ReceiverClosed;
                    }
                }
                Ok(None) => {
                    tracing::debug!(event = ?frame.event, "Ignoring unrecognized push event");
                }
                Err(e) => {
                    tracing::warn!(
                        event = ?frame.event,
                        payload_bytes = frame.data.len(),
                        error = %e,
                        "Dropping malformed push payload"
                    );
                }
            }
        }
    }
}

/// Turn one SSE frame into a [`PushEvent`].
///
/// Named events (`event: doubt:available`) carry the payload directly.
/// Unnamed frames may carry an envelope `{"event": "...", "data": {...}}`.
/// `Ok(None)` means the frame is well-formed but not one we handle.
pub(crate) fn decode_push_frame(frame: &SseFrame) -> Result<Option<PushEvent>, PayloadError> {
    let json: Value =
        serde_json::from_str(&frame.data).map_err(|e| PayloadError::Json(e.to_string()))?;

    let (name, payload) = match frame.event.as_deref() {
        Some(name) if name != "message" => (name.to_string(), json),
        _ => {
            let Some(name) = json
                .get("event")
                .or_else(|| json.get("type"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
            else {
                return Ok(None);
            };
            let payload = json
                .get("data")
                .or_else(|| json.get("payload"))
                .cloned()
                .unwrap_or(Value::Null);
            (name, payload)
        }
    };

    match name.as_str() {
        EVENT_DOUBT_AVAILABLE => {
            let doubt = AvailableDoubt::try_from(DoubtPayload::from_json(&payload)?)?;
            Ok(Some(PushEvent::Available(doubt)))
        }
        EVENT_DOUBT_ASSIGNED => {
            let assigned = AssignedPayload::from_json(&payload)?;
            Ok(Some(PushEvent::Assigned(assigned.doubt_id)))
        }
        _ => Ok(None),
    }
}
