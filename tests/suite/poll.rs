//! Polling against a mock backend: seeding, backstop arrivals and withdrawals.

use std::time::Duration;

use edufoyer_client::AVAILABLE_DOUBTS_PATH;
use edufoyer_reconciler::{AvailabilityEvent, WithdrawReason};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    WAIT, doubt_json, ids, mount_available, next_event, spawn_polling, start_backend,
    wait_for_seed,
};

#[tokio::test]
async fn first_poll_seeds_without_notifications() {
    let server = start_backend().await;
    let seed: Vec<_> = (1..=5).map(|i| doubt_json(&format!("d{i}"), "java")).collect();
    mount_available(&server, seed, None).await;

    let handle = spawn_polling(&server, Duration::from_millis(50));
    let mut sub = handle.subscribe();
    wait_for_seed(&handle).await;

    // Let several more polls of the same list go by.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(sub.try_recv().is_none(), "seeded doubts must not be announced");
    assert_eq!(
        ids(&handle.snapshot().await.unwrap()),
        vec!["d1", "d2", "d3", "d4", "d5"]
    );
    handle.dispose().await;
}

#[tokio::test]
async fn poll_backstop_announces_new_doubts_within_one_interval() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], Some(1)).await;
    mount_available(
        &server,
        vec![doubt_json("d1", "java"), doubt_json("d2", "dbms")],
        None,
    )
    .await;

    let handle = spawn_polling(&server, Duration::from_millis(100));
    let mut sub = handle.subscribe();

    match next_event(&mut sub).await {
        AvailabilityEvent::Available(doubt) => {
            assert_eq!(doubt.id.as_str(), "d2");
            assert_eq!(doubt.subject, "dbms");
        }
        other => panic!("expected d2 to arrive, got {other:?}"),
    }
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["d1", "d2"]);
    handle.dispose().await;
}

#[tokio::test]
async fn doubt_missing_from_poll_is_withdrawn_and_stays_withdrawn() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], Some(1)).await;
    mount_available(&server, Vec::new(), Some(1)).await;
    // The backend's list "flaps" and shows d1 again.
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;

    let handle = spawn_polling(&server, Duration::from_millis(50));
    let mut sub = handle.subscribe();

    assert_eq!(
        next_event(&mut sub).await,
        AvailabilityEvent::Withdrawn {
            id: "d1".try_into().unwrap(),
            reason: WithdrawReason::AbsentFromPoll,
        }
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(sub.try_recv().is_none());
    assert!(handle.snapshot().await.unwrap().is_empty());
    handle.dispose().await;
}

#[tokio::test]
async fn poll_failures_are_reported_through_health_only() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(AVAILABLE_DOUBTS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;

    let handle = spawn_polling(&server, Duration::from_millis(50));
    let mut sub = handle.subscribe();
    let mut health = handle.health();

    tokio::time::timeout(WAIT, health.wait_for(|h| h.consecutive_poll_failures >= 1))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(
        WAIT,
        health.wait_for(|h| h.consecutive_poll_failures == 0 && h.last_poll_ok.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    // The first successful poll is still the seeding one.
    assert!(sub.try_recv().is_none());
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["d1"]);
    handle.dispose().await;
}

#[tokio::test]
async fn unauthorized_poll_flags_health() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(AVAILABLE_DOUBTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let handle = spawn_polling(&server, Duration::from_secs(60));
    let mut health = handle.health();

    tokio::time::timeout(WAIT, health.wait_for(|h| h.auth_failed))
        .await
        .unwrap()
        .unwrap();
    assert!(health.borrow().is_offline());
    handle.dispose().await;
}

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let server = start_backend().await;
    mount_available(&server, Vec::new(), Some(1)).await;
    mount_available(
        &server,
        vec![
            serde_json::json!({"_id": "bad", "subject": "java", "createdAt": "yesterday"}),
            serde_json::json!({"subject": "java", "createdAt": "2024-03-01T10:00:00Z"}),
            doubt_json("good", "java"),
        ],
        None,
    )
    .await;

    let handle = spawn_polling(&server, Duration::from_millis(50));
    let mut sub = handle.subscribe();

    match next_event(&mut sub).await {
        AvailabilityEvent::Available(doubt) => assert_eq!(doubt.id.as_str(), "good"),
        other => panic!("expected the valid doubt, got {other:?}"),
    }
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["good"]);
    handle.dispose().await;
}

#[tokio::test]
async fn malformed_copy_of_a_listed_doubt_does_not_withdraw_it() {
    let server = start_backend().await;
    mount_available(&server, vec![doubt_json("d1", "java")], Some(1)).await;
    let mut broken = doubt_json("d1", "java");
    broken["createdAt"] = serde_json::json!("2024-03-01 10:00");
    mount_available(&server, vec![broken], Some(1)).await;
    mount_available(&server, vec![doubt_json("d1", "java")], None).await;

    let handle = spawn_polling(&server, Duration::from_millis(50));
    let mut sub = handle.subscribe();
    wait_for_seed(&handle).await;

    tokio::time::timeout(WAIT, async {
        while server.received_requests().await.unwrap_or_default().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(sub.try_recv().is_none());
    assert_eq!(ids(&handle.snapshot().await.unwrap()), vec!["d1"]);
    handle.dispose().await;
}
