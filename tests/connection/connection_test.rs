//! Connect, reconnect and fatal failure behavior.

use tokio::sync::mpsc;
use tracing::Level;

use ribcage::connection::{ConnectionManager, ConnectionState, Fatal};
use ribcage::transport::TransportEvent;

use crate::support::{capture_logs, identity, FakeTransport};

const TARGET: &str = "ribcage::connection";

#[tokio::test]
async fn connect_success_returns_identity() {
    let transport = FakeTransport::new();
    transport.push_ok(identity());
    let (tx, _rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let (logs, _guard) = capture_logs();
    let me = manager.connect().await.expect("connect should succeed");

    assert_eq!(me, identity());
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(transport.connect_count(), 1);
    assert!(logs.at(Level::ERROR, TARGET).is_empty());
}

#[tokio::test]
async fn connect_failure_is_fatal_and_logs_twice() {
    let transport = FakeTransport::new();
    transport.push_err("invalid_auth");
    let (tx, _rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);

    let (logs, _guard) = capture_logs();
    let err = match manager.connect().await {
        Ok(me) => panic!("connect should fail, got {me:?}"),
        Err(err) => err,
    };

    assert!(matches!(err, Fatal::Connect(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(manager.state(), ConnectionState::FailedFatally);

    let errors = logs.at(Level::ERROR, TARGET);
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert_eq!(errors[0].message, "Error connecting to RTM");
    assert!(errors[1].message.contains("invalid_auth"));
}

#[tokio::test]
async fn connect_failure_does_not_retry() {
    let transport = FakeTransport::new();
    transport.push_err("invalid_auth");
    transport.push_ok(identity());
    let (tx, _rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);

    assert!(manager.connect().await.is_err());
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn reconnect_success_logs_notice_once() {
    let transport = FakeTransport::new();
    transport.push_ok(identity());
    transport.push_ok(identity());
    let (tx, _rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);
    manager.connect().await.expect("connect should succeed");

    let (logs, _guard) = capture_logs();
    manager.reconnect().await.expect("reconnect should succeed");

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
    let infos = logs.at(Level::INFO, TARGET);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].message, "rtm closed, attempting to reconnect");
    assert!(logs.at(Level::ERROR, TARGET).is_empty());
}

#[tokio::test]
async fn reconnect_failure_is_fatal() {
    let transport = FakeTransport::new();
    transport.push_ok(identity());
    transport.push_err("account_inactive");
    let (tx, _rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);
    manager.connect().await.expect("connect should succeed");

    let (logs, _guard) = capture_logs();
    let err = match manager.reconnect().await {
        Ok(me) => panic!("reconnect should fail, got {me:?}"),
        Err(err) => err,
    };

    assert!(matches!(err, Fatal::Reconnect(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(manager.state(), ConnectionState::FailedFatally);

    let errors = logs.at(Level::ERROR, TARGET);
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert_eq!(
        errors[0].message,
        "could not reconnect to the rtm, shutting down"
    );
    assert!(errors[1].message.contains("account_inactive"));
}

#[tokio::test]
async fn events_flow_through_the_manager_channel() {
    let transport = FakeTransport::new();
    transport.push_ok(identity());
    let (tx, mut rx) = mpsc::channel(8);
    let mut manager = ConnectionManager::new(transport.clone(), tx);
    manager.connect().await.expect("connect should succeed");

    transport
        .emit(TransportEvent::Closed {
            reason: Some("bye".to_owned()),
        })
        .await;

    match rx.recv().await {
        Some(TransportEvent::Closed { reason }) => assert_eq!(reason.as_deref(), Some("bye")),
        other => panic!("expected close event, got {other:?}"),
    }
}
