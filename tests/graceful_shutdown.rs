//! End-to-end shutdown sequence against a running service.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use backend_service::cache::CacheError;
use backend_service::lifecycle::{ShutdownOutcome, StepOutcome, TeardownPhase};

mod common;

async fn next_json<S>(stream: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await.expect("stream ended").expect("ws error") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_websocket_clients_are_notified_and_closed() {
    let app = common::spawn_app(common::test_config()).await;

    let (mut socket, _) = connect_async(app.ws_url()).await.unwrap();
    socket
        .send(Message::Text(r#"{"event":"join-room","data":{"room":"general"}}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["event"], "user-joined-room");
    assert_eq!(next_json(&mut socket).await["event"], "joined-room");
    assert_eq!(app.gateway.connected_count(), 1);

    let coordinator = app.coordinator.clone();
    let shutdown = tokio::spawn(async move { coordinator.on_termination_signal("SIGTERM").await });

    let notice = next_json(&mut socket).await;
    assert_eq!(notice["event"], "server-shutdown");

    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close frame, got {other:?}"),
    }

    let outcome = shutdown.await.unwrap();
    assert_eq!(outcome, Some(ShutdownOutcome::Completed));
    assert_eq!(app.gateway.connected_count(), 0);
}

#[tokio::test]
async fn test_upgrade_refused_while_shutting_down() {
    let app = common::spawn_app(common::test_config()).await;
    app.state.begin();

    let err = connect_async(app.ws_url()).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP 503, got {other:?}"),
    }

    // Readiness was flipped by hand; the signal still runs every step.
    let outcome = app.coordinator.on_termination_signal("SIGTERM").await;
    assert_eq!(outcome, Some(ShutdownOutcome::Completed));
    assert_eq!(app.coordinator.reports().len(), 6);
    assert!(app.queue.is_closed());
}

#[tokio::test]
async fn test_full_sequence_tears_everything_down() {
    let app = common::spawn_app(common::test_config()).await;

    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = finished.clone();
        app.queue
            .submit("send-welcome-email", async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    let outcome = app.coordinator.on_termination_signal("SIGTERM").await;
    assert_eq!(outcome, Some(ShutdownOutcome::Completed));
    assert_eq!(outcome.unwrap().exit_code(), 0);

    // Active job finished inside the drain step.
    assert!(finished.load(Ordering::SeqCst));
    assert!(app.queue.is_closed());
    assert!(app.scheduler.is_stopped());
    assert!(app.scheduler.jobs().is_empty());
    assert!(matches!(app.cache.get("anything").await, Err(CacheError::Closed)));

    let phases: Vec<(TeardownPhase, StepOutcome)> = app
        .coordinator
        .reports()
        .into_iter()
        .map(|r| (r.phase, r.outcome))
        .collect();
    assert_eq!(
        phases,
        vec![
            (TeardownPhase::MarkShuttingDown, StepOutcome::Completed),
            (TeardownPhase::CloseRealtime, StepOutcome::Completed),
            (TeardownPhase::StopScheduler, StepOutcome::Completed),
            (TeardownPhase::DrainQueues, StepOutcome::Completed),
            (TeardownPhase::CloseCache, StepOutcome::Completed),
            (TeardownPhase::CloseDatabase, StepOutcome::Skipped),
        ]
    );

    // Second signal is ignored and the flag stays set.
    assert_eq!(app.coordinator.on_termination_signal("SIGINT").await, None);
    assert!(app.state.is_shutting_down());

    // The HTTP server stops once the sequence is done.
    let served = tokio::time::timeout(Duration::from_secs(5), app.server).await;
    assert!(matches!(served, Ok(Ok(Ok(())))));
}
