// ============================
// crates/backend-lib/tests/http_tests.rs
// ============================
//! HTTP surface and a real WebSocket round trip against a bound listener.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use backend_lib::ws_router::create_router;
use backend_lib::AppState;
use common::{state, EVENT_TIMEOUT};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: &str, name: &str) -> Socket {
    let url = format!("ws://{addr}/ws?userId={user_id}&name={name}");
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, event: Value) {
    socket
        .send(Message::text(event.to_string()))
        .await
        .unwrap();
}

/// Next text frame as JSON
async fn recv(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn recv_event(socket: &mut Socket, name: &str) -> Value {
    loop {
        let event = recv(socket).await;
        if event["event"] == name {
            return event["data"].clone();
        }
    }
}

#[tokio::test]
async fn test_health_reports_counts() {
    let state = state();
    let response = create_router(Arc::clone(&state))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["activeRooms"], 0);
    assert_eq!(json["activeSockets"], 0);
}

#[tokio::test]
async fn test_handshake_without_user_is_rejected() {
    let addr = serve(state()).await;
    let result = connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_websocket_watch_party() {
    let state = state();
    let addr = serve(Arc::clone(&state)).await;
    let mut alice = connect(addr, "user-a", "Alice").await;
    let mut bob = connect(addr, "user-b", "Bob").await;

    send(&mut alice, json!({ "event": "join", "data": { "roomId": "abc123" } })).await;
    let room = recv_event(&mut alice, "room-state").await;
    assert_eq!(room["isHost"], true);
    assert_eq!(room["userCount"], 1);
    assert_eq!(room["syncTolerance"], 0.5);

    send(&mut bob, json!({ "event": "join", "data": { "roomId": "abc123" } })).await;
    let room = recv_event(&mut bob, "room-state").await;
    assert_eq!(room["isHost"], false);
    assert_eq!(room["userCount"], 2);
    assert_eq!(
        recv_event(&mut alice, "system-message").await["message"],
        "Bob joined your party 🎉"
    );

    // garbage is ignored and the socket stays usable
    alice.send(Message::text("{not json")).await.unwrap();

    send(
        &mut alice,
        json!({
            "event": "sync-action",
            "data": { "roomId": "abc123", "type": "pause", "timestamp": 42.0, "isPlaying": false }
        }),
    )
    .await;
    let update = recv_event(&mut bob, "sync-update").await;
    assert_eq!(update["timestamp"], 42.0);
    assert_eq!(update["isPlaying"], false);

    send(
        &mut bob,
        json!({ "event": "chat-message", "data": { "roomId": "abc123", "message": "<b>hi</b>" } }),
    )
    .await;
    let chat = recv_event(&mut alice, "new-chat").await;
    assert_eq!(chat["sender"], "Bob");
    // escaped exactly once
    assert_eq!(chat["message"], "&lt;b&gt;hi&lt;/b&gt;");

    assert_eq!(state.active_connections(), 2);
    assert_eq!(state.stats.snapshot().invalid_ignored, 1);

    bob.close(None).await.unwrap();
    assert_eq!(
        recv_event(&mut alice, "system-message").await["message"],
        "Bob left the party"
    );
    assert_eq!(recv_event(&mut alice, "update-user-count").await["count"], 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.active_connections(), 1);
}
