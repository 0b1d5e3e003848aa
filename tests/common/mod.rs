//! Shared test utilities and fixtures
//!
//! A mock EduFoyer backend plus helpers for driving a reconciler against it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use edufoyer_client::retry::RetryConfig;
use edufoyer_client::{
    AVAILABLE_DOUBTS_PATH, BackendEndpoint, HttpDoubtApi, PushOptions, spawn_push_listener,
};
use edufoyer_reconciler::{
    AvailabilityEvent, AvailableDoubt, Reconciler, ReconcilerHandle, ReconcilerOptions, Subscription,
};
use edufoyer_types::{AuthToken, SolverRegistration};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";
pub const WAIT: Duration = Duration::from_secs(5);

pub async fn start_backend() -> MockServer {
    MockServer::start().await
}

pub fn endpoint(server: &MockServer) -> BackendEndpoint {
    BackendEndpoint::new(&server.uri(), AuthToken::new(TOKEN)).unwrap()
}

/// HTTP adapter with poll retries disabled.
///
/// Each test gets its own `reqwest::Client`: pooled connections must not
/// outlive the test's runtime.
pub fn api(server: &MockServer) -> Arc<HttpDoubtApi> {
    Arc::new(
        HttpDoubtApi::new(reqwest::Client::new(), endpoint(server))
            .with_request_timeout(Duration::from_secs(5))
            .with_poll_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            }),
    )
}

pub fn doubt_json(id: &str, subject: &str) -> Value {
    json!({
        "_id": id,
        "subject": subject,
        "description": format!("Question {id}"),
        "status": "open",
        "createdAt": "2024-03-01T10:00:00.000Z"
    })
}

/// Serve `doubts` from the poll endpoint.
///
/// With `times`, the response is used that many times and then falls through
/// to mocks mounted later.
pub async fn mount_available(server: &MockServer, doubts: Vec<Value>, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(AVAILABLE_DOUBTS_PATH))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "doubts": doubts })),
        );
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

pub fn options(poll_interval: Duration) -> ReconcilerOptions {
    ReconcilerOptions {
        poll_interval,
        ..ReconcilerOptions::default()
    }
}

/// Reconciler with polling only.
pub fn spawn_polling(server: &MockServer, poll_interval: Duration) -> ReconcilerHandle {
    Reconciler::spawn(api(server), None, options(poll_interval))
}

/// Reconciler with polling plus the push stream.
pub fn spawn_with_push(server: &MockServer, poll_interval: Duration) -> ReconcilerHandle {
    let (tx, rx) = mpsc::channel(16);
    spawn_push_listener(
        reqwest::Client::new(),
        endpoint(server),
        SolverRegistration {
            user_id: "solver-1".to_string(),
            subjects: vec!["java".to_string()],
        },
        PushOptions {
            idle_timeout: WAIT,
            reconnect: RetryConfig {
                max_retries: 0,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
                jitter_factor: 0.0,
            },
        },
        tx,
    );
    Reconciler::spawn(
        api(server),
        Some(rx),
        ReconcilerOptions {
            subjects: vec!["java".to_string()],
            ..options(poll_interval)
        },
    )
}

pub async fn wait_for_seed(handle: &ReconcilerHandle) {
    let mut health = handle.health();
    tokio::time::timeout(WAIT, health.wait_for(|h| h.last_poll_ok.is_some()))
        .await
        .expect("initial poll never completed")
        .unwrap();
}

pub async fn next_event(sub: &mut Subscription) -> AvailabilityEvent {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for availability event")
        .expect("subscription ended")
}

pub fn ids(doubts: &[AvailableDoubt]) -> Vec<String> {
    doubts.iter().map(|d| d.id.to_string()).collect()
}
