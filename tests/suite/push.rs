//! Push stream end to end: SSE from the mock backend through the reconciler.

use std::time::Duration;

use edufoyer_client::SOLVER_STREAM_PATH;
use edufoyer_reconciler::{AvailabilityEvent, WithdrawReason};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    doubt_json, mount_available, next_event, spawn_with_push, start_backend,
};

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(SOLVER_STREAM_PATH))
        .and(body_partial_json(json!({
            "type": "registerSolver",
            "userId": "solver-1",
            "subjects": ["java"]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

fn sse(event: &str, data: &serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

#[tokio::test]
async fn pushed_doubt_is_announced_then_withdrawn_on_assignment() {
    let server = start_backend().await;
    mount_available(&server, Vec::new(), None).await;

    let available = json!({
        "doubtId": "d1",
        "subject": "java",
        "description": "Why is String immutable?",
        "status": "open",
        "createdAt": "2024-03-01T10:00:00Z"
    });
    let mut body = String::from(": connected\n\n");
    body.push_str(&sse("doubt:available", &available));
    // Duplicate delivery and a doubt for a subject this solver does not handle.
    body.push_str(&sse("doubt:available", &available));
    body.push_str(&sse(
        "doubt:available",
        &json!({
            "doubtId": "p1",
            "subject": "physics",
            "status": "open",
            "createdAt": "2024-03-01T10:00:00Z"
        }),
    ));
    body.push_str(&sse("doubt:available", &json!({"doubtId": "broken"})));
    body.push_str(&sse("doubt:assigned", &json!({"doubtId": "d1"})));
    mount_stream(&server, body).await;

    let handle = spawn_with_push(&server, Duration::from_secs(60));
    let mut sub = handle.subscribe();

    match next_event(&mut sub).await {
        AvailabilityEvent::Available(doubt) => {
            assert_eq!(doubt.id.as_str(), "d1");
            assert_eq!(doubt.description, "Why is String immutable?");
        }
        other => panic!("expected d1 to arrive, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut sub).await,
        AvailabilityEvent::Withdrawn {
            id: "d1".try_into().unwrap(),
            reason: WithdrawReason::Assigned,
        }
    );

    // The stream ends and reconnects, replaying the same events; nothing new fires.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sub.try_recv().is_none());
    assert!(handle.snapshot().await.unwrap().is_empty());
    handle.dispose().await;
}

#[tokio::test]
async fn rejected_stream_credentials_fall_back_to_polling() {
    let server = start_backend().await;
    mount_available(&server, Vec::new(), Some(1)).await;
    mount_available(&server, vec![doubt_json("d5", "java")], None).await;
    Mock::given(method("POST"))
        .and(path(SOLVER_STREAM_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let handle = spawn_with_push(&server, Duration::from_millis(100));
    let mut sub = handle.subscribe();

    match next_event(&mut sub).await {
        AvailabilityEvent::Available(doubt) => assert_eq!(doubt.id.as_str(), "d5"),
        other => panic!("expected d5 via polling, got {other:?}"),
    }
    assert!(!handle.health().borrow().push_connected);
    handle.dispose().await;
}
