//! Live-channel tests against an in-process WebSocket server: connect,
//! frame delivery, heartbeat, caller close, peer close, and the reconnect
//! budget.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

use moot::livesync::*;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

async fn ws_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Fast retry settings so failure tests finish in milliseconds.
fn quick_config(url: &str) -> LiveSyncConfig {
    let mut cfg = LiveSyncConfig::new(url);
    cfg.max_reconnect_attempts = 2;
    cfg.backoff_base_ms = 10;
    cfg.heartbeat = None;
    cfg.connect_timeout = Duration::from_secs(2);
    cfg
}

async fn next_event(rx: &mut UnboundedReceiver<LiveEvent>) -> LiveEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a live event")
        .expect("event channel closed")
}

fn message_frame(id: u64) -> WsMessage {
    WsMessage::Text(
        serde_json::json!({
            "type": "new_message",
            "data": {
                "id": id,
                "discussion_id": 7,
                "user_address": "0xabc",
                "username": "ada",
                "message": "point of order",
                "timestamp": "2025-03-01T10:00:00"
            }
        })
        .to_string(),
    )
}

fn juror_frame(juror_id: u32, result: &str) -> WsMessage {
    WsMessage::Text(
        serde_json::json!({
            "type": "juror_response",
            "data": {
                "juror_id": juror_id,
                "discussion_id": 7,
                "latest_msg_id": 1,
                "result": result,
                "reasoning": "persuasive",
                "created_at": "2025-03-01T10:00:05"
            }
        })
        .to_string(),
    )
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_reports_connected_and_open() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let _server = accept_one(&listener).await;

    match next_event(&mut rx).await {
        LiveEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    assert_eq!(sync.phase(), Phase::Open);
    assert!(sync.is_connected());
}

#[tokio::test]
async fn test_second_connect_while_running_is_ignored() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let _server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    sync.connect();
    let second = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(second.is_err(), "second connect must not dial again");
}

// ---------------------------------------------------------------------------
// Frame delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_new_message_frames_reach_the_consumer() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    server.send(message_frame(41)).await.unwrap();
    match next_event(&mut rx).await {
        LiveEvent::NewMessage(msg) => {
            assert_eq!(msg.id, 41);
            assert_eq!(msg.username, "ada");
        }
        other => panic!("expected NewMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn test_frames_arrive_in_transport_order() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    server.send(message_frame(1)).await.unwrap();
    server.send(juror_frame(0, "1")).await.unwrap();
    server.send(message_frame(2)).await.unwrap();

    match next_event(&mut rx).await {
        LiveEvent::NewMessage(m) => assert_eq!(m.id, 1),
        other => panic!("out of order: {other:?}"),
    }
    match next_event(&mut rx).await {
        LiveEvent::JurorResponse(v) => assert_eq!(v.result, "1"),
        other => panic!("out of order: {other:?}"),
    }
    match next_event(&mut rx).await {
        LiveEvent::NewMessage(m) => assert_eq!(m.id, 2),
        other => panic!("out of order: {other:?}"),
    }
}

#[tokio::test]
async fn test_pong_and_unknown_frames_are_not_forwarded() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    server
        .send(WsMessage::Text(r#"{"type":"pong"}"#.into()))
        .await
        .unwrap();
    server
        .send(WsMessage::Text(r#"{"type":"gavel","data":{}}"#.into()))
        .await
        .unwrap();
    server.send(message_frame(9)).await.unwrap();

    // The first thing through must be the real message.
    match next_event(&mut rx).await {
        LiveEvent::NewMessage(m) => assert_eq!(m.id, 9),
        other => panic!("noise leaked through: {other:?}"),
    }
}

#[tokio::test]
async fn test_redelivered_frames_are_forwarded_twice() {
    // Dedup belongs to the session layer; the channel must not hide
    // redeliveries from it.
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    server.send(message_frame(4)).await.unwrap();
    server.send(message_frame(4)).await.unwrap();

    for _ in 0..2 {
        match next_event(&mut rx).await {
            LiveEvent::NewMessage(m) => assert_eq!(m.id, 4),
            other => panic!("expected NewMessage, got {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_heartbeat_ping_reaches_the_server() {
    let (listener, url) = ws_server().await;
    let mut cfg = quick_config(&url);
    cfg.heartbeat = Some(Duration::from_millis(50));
    let (sync, mut rx) = LiveSync::new(cfg);
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    let frame = timeout(Duration::from_secs(5), server.next())
        .await
        .expect("no heartbeat within 5s")
        .expect("server stream ended")
        .expect("server read failed");
    match frame {
        WsMessage::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "ping");
        }
        other => panic!("expected a text ping, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Caller close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_closes_normally_without_retry() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut server = accept_one(&listener).await;
    let _ = next_event(&mut rx).await;

    sync.disconnect();
    match next_event(&mut rx).await {
        LiveEvent::Disconnected { will_retry: false } => {}
        other => panic!("expected final Disconnected, got {other:?}"),
    }
    assert_eq!(sync.phase(), Phase::Idle);

    // The server sees a proper close frame, not a dropped socket.
    let frame = timeout(Duration::from_secs(5), server.next())
        .await
        .expect("no close frame within 5s")
        .expect("server stream ended");
    assert!(matches!(frame, Ok(WsMessage::Close(_))));

    // And no reconnect is ever dialed.
    let redial = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(redial.is_err(), "caller close must not reconnect");
}

// ---------------------------------------------------------------------------
// Peer close and the retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_peer_close_consumes_budget_and_reconnects() {
    let (listener, url) = ws_server().await;
    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    let mut first = accept_one(&listener).await;
    match next_event(&mut rx).await {
        LiveEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }

    first.send(WsMessage::Close(None)).await.unwrap();
    drop(first);

    match next_event(&mut rx).await {
        LiveEvent::Disconnected { will_retry: true } => {}
        other => panic!("expected retrying Disconnected, got {other:?}"),
    }

    let _second = accept_one(&listener).await;
    match next_event(&mut rx).await {
        LiveEvent::Connected => {}
        other => panic!("expected reconnect, got {other:?}"),
    }
    assert_eq!(sync.phase(), Phase::Open);
}

#[tokio::test]
async fn test_dead_endpoint_gives_up_after_budget() {
    // Bind then drop, so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();

    for attempt in 0..2 {
        match next_event(&mut rx).await {
            LiveEvent::Disconnected { will_retry: true } => {}
            other => panic!("attempt {attempt}: expected retrying Disconnected, got {other:?}"),
        }
    }
    match next_event(&mut rx).await {
        LiveEvent::GaveUp => {}
        other => panic!("expected GaveUp, got {other:?}"),
    }
    assert_eq!(sync.phase(), Phase::Failed);
}

#[tokio::test]
async fn test_connect_after_failed_starts_fresh() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");
    drop(listener);

    let (sync, mut rx) = LiveSync::new(quick_config(&url));
    sync.connect();
    loop {
        if matches!(next_event(&mut rx).await, LiveEvent::GaveUp) {
            break;
        }
    }
    assert_eq!(sync.phase(), Phase::Failed);

    // Bring the endpoint up on the same port; a manual connect gets a
    // fresh budget and succeeds.
    let listener = TcpListener::bind(addr).await.unwrap();
    sync.connect();
    let _server = accept_one(&listener).await;
    match next_event(&mut rx).await {
        LiveEvent::Connected => {}
        other => panic!("expected Connected after manual retry, got {other:?}"),
    }
    assert_eq!(sync.phase(), Phase::Open);
}
