//! Listener matching and event fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use ribcage::session::Session;
use ribcage::transport::{IncomingMessage, MessageKind, Scope};

use crate::support::{mention, message, session, BOT_ID};

type Handler =
    dyn Fn(Session, IncomingMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

fn reply_with(text: &'static str) -> Box<Handler> {
    Box::new(move |session: Session, message: IncomingMessage| {
        Box::pin(async move {
            session.reply(&message, text).await?;
            Ok::<(), anyhow::Error>(())
        })
    })
}

#[tokio::test]
async fn first_matching_listener_wins() {
    let (session, transport) = session();
    session
        .hears(&["^deploy"], Scope::DIRECT, reply_with("first"))
        .expect("pattern compiles");
    session
        .hears(&["deploy"], Scope::DIRECT, reply_with("second"))
        .expect("pattern compiles");

    session.dispatch_message(mention("deploy now")).await;
    session.dispatch_message(mention("please deploy")).await;

    assert_eq!(transport.sent_texts(), vec!["first", "second"]);
}

#[tokio::test]
async fn any_pattern_in_a_listener_matches() {
    let (session, transport) = session();
    session
        .hears(&["^hi$", "^hello$"], Scope::ALL, reply_with("hey"))
        .expect("patterns compile");

    session.dispatch_message(mention("hello")).await;
    session
        .dispatch_message(message("hi", MessageKind::Ambient))
        .await;
    assert_eq!(transport.sent_texts(), vec!["hey", "hey"]);
}

#[tokio::test]
async fn scope_filters_message_kinds() {
    let (session, transport) = session();
    session
        .hears(&["^status$"], Scope::new(&[MessageKind::Mention]), reply_with("ok"))
        .expect("pattern compiles");

    session.dispatch_message(mention("status")).await;
    session
        .dispatch_message(message("status", MessageKind::Mention))
        .await;
    assert_eq!(transport.sent_texts(), vec!["ok"]);
}

#[tokio::test]
async fn own_messages_are_dropped() {
    let (session, transport) = session();
    session
        .hears(&[".*"], Scope::ALL, reply_with("echo"))
        .expect("pattern compiles");

    let mut own = message("anything", MessageKind::Ambient);
    own.user = BOT_ID.to_owned();
    session.dispatch_message(own).await;
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn invalid_pattern_is_rejected() {
    let (session, _transport) = session();
    assert!(session
        .hears(&["("], Scope::ALL, reply_with("never"))
        .is_err());
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn failing_listener_does_not_stop_dispatch() {
    let (session, transport) = session();
    session
        .hears(&["^boom$"], Scope::ALL, |_session: Session, _message: IncomingMessage| async {
            Err::<(), anyhow::Error>(anyhow::anyhow!("boom"))
        })
        .expect("pattern compiles");
    session
        .hears(&["^ping$"], Scope::ALL, reply_with("pong"))
        .expect("pattern compiles");

    session.dispatch_message(mention("boom")).await;
    session.dispatch_message(mention("ping")).await;
    assert_eq!(transport.sent_texts(), vec!["pong"]);
}

#[tokio::test]
async fn every_event_handler_runs() {
    let (session, _transport) = session();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        session.on("rtm_close", move |_session: Session, payload: serde_json::Value| {
            let calls = Arc::clone(&calls);
            async move {
                assert_eq!(payload["reason"], "bye");
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });
    }

    session
        .dispatch_event("rtm_close", serde_json::json!({ "reason": "bye" }))
        .await;
    session
        .dispatch_event("hello", serde_json::json!({}))
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
