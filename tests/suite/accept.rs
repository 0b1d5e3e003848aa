//! The accept race against a mock backend.

use std::time::Duration;

use edufoyer_client::ACCEPT_DOUBT_PATH;
use edufoyer_reconciler::{AcceptResult, AvailabilityEvent, ReconcilerError, WithdrawReason};
use edufoyer_types::DoubtId;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    TOKEN, doubt_json, ids, mount_available, spawn_polling, start_backend, wait_for_seed,
};

fn d1() -> DoubtId {
    DoubtId::new("d1").unwrap()
}

async fn mount_accept(server: &MockServer, response: ResponseTemplate, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path(ACCEPT_DOUBT_PATH))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_json(json!({ "doubtId": "d1" })))
        .respond_with(response);
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

#[tokio::test]
async fn concurrent_accepts_have_exactly_one_winner() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;
    mount_accept(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "session": { "roomName": "room-d1", "joinUrl": "https://meet.example/room-d1" }
        })),
        Some(1),
    )
    .await;
    mount_accept(
        &server,
        ResponseTemplate::new(409).set_body_json(json!({ "message": "already assigned" })),
        None,
    )
    .await;

    let alice = spawn_polling(&server, Duration::from_millis(50));
    let bob = spawn_polling(&server, Duration::from_millis(50));
    wait_for_seed(&alice).await;
    wait_for_seed(&bob).await;
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    let (a, b) = tokio::join!(alice.accept_doubt(d1()), bob.accept_doubt(d1()));
    let results = [a.unwrap(), b.unwrap()];

    let wins = results.iter().filter(|r| r.is_success()).count();
    let losses = results
        .iter()
        .filter(|r| **r == AcceptResult::LostRace)
        .count();
    assert_eq!((wins, losses), (1, 1), "results: {results:?}");

    let winner = results.iter().find_map(|r| match r {
        AcceptResult::Success(join) => Some(join),
        _ => None,
    });
    assert_eq!(winner.unwrap().session_id, "room-d1");
    assert_eq!(
        winner.unwrap().join_url.as_deref(),
        Some("https://meet.example/room-d1")
    );

    for (events, result) in [(&mut alice_events, &results[0]), (&mut bob_events, &results[1])] {
        let expected = if result.is_success() {
            WithdrawReason::AcceptedBySelf
        } else {
            WithdrawReason::LostRace
        };
        assert_eq!(
            events.try_recv(),
            Some(AvailabilityEvent::Withdrawn {
                id: d1(),
                reason: expected
            })
        );
    }

    // The backend keeps listing d1; neither side resurrects it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ids(&alice.snapshot().await.unwrap()).is_empty());
    assert!(ids(&bob.snapshot().await.unwrap()).is_empty());
    assert!(alice_events.try_recv().is_none());
    assert!(bob_events.try_recv().is_none());

    alice.dispose().await;
    bob.dispose().await;
}

#[tokio::test]
async fn vanished_doubt_reports_no_longer_exists() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;
    mount_accept(&server, ResponseTemplate::new(404), None).await;

    let handle = spawn_polling(&server, Duration::from_secs(60));
    wait_for_seed(&handle).await;

    assert_eq!(
        handle.accept_doubt(d1()).await,
        Ok(AcceptResult::NoLongerExists)
    );
    assert!(handle.snapshot().await.unwrap().is_empty());
    handle.dispose().await;
}

#[tokio::test]
async fn server_error_is_retryable_and_keeps_the_doubt() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;
    mount_accept(&server, ResponseTemplate::new(503), Some(1)).await;
    mount_accept(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "sessionId": "s-1" })),
        None,
    )
    .await;

    let handle = spawn_polling(&server, Duration::from_secs(60));
    wait_for_seed(&handle).await;

    let first = handle.accept_doubt(d1()).await.unwrap();
    assert!(first.is_retryable(), "got {first:?}");
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["d1"]);

    let second = handle.accept_doubt(d1()).await.unwrap();
    assert!(second.is_success());
    assert!(handle.snapshot().await.unwrap().is_empty());
    handle.dispose().await;
}

#[tokio::test]
async fn unauthorized_accept_is_fatal() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;
    mount_accept(&server, ResponseTemplate::new(401), None).await;

    let handle = spawn_polling(&server, Duration::from_secs(60));
    wait_for_seed(&handle).await;

    assert_eq!(
        handle.accept_doubt(d1()).await,
        Err(ReconcilerError::Unauthorized)
    );
    assert!(handle.health().borrow().auth_failed);
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["d1"]);
    handle.dispose().await;
}
