// ============================
// syncwatch-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use syncwatch_common::ServerEvent;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth::{HandshakeParams, Identity};
use crate::handlers;
use crate::websocket::ConnectionHandler;
use crate::AppState;

/// Per-connection outbound queue depth
pub const OUTBOX_CAPACITY: usize = 128;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http());

    let router = if state.settings.cors_allow_any {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Handler for WebSocket upgrades. The identity is resolved before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match state.identity.identify(&params).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(target: "syncwatch.ws", error = %e, "Handshake rejected");
            return e.into_response();
        },
    };

    let max_bytes = state.settings.limits.max_message_bytes;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, identity))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut sink, mut stream) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);

    let mut handler = ConnectionHandler::new(Arc::clone(&state), identity, outbox_tx);
    let connection_id = handler.connection_id().to_string();
    state.connection_opened();
    info!(
        target: "syncwatch.ws",
        %connection_id,
        user_id = %handler.identity().user_id,
        "Connection opened"
    );

    // Writer: serialize outbound events onto the socket
    let writer_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(target: "syncwatch.ws", connection_id = %writer_id, error = %e, "Failed to encode event");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: process inbound frames until the client goes away
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handler.handle_text(text.as_str()).await;
            },
            Ok(Message::Binary(_)) => {
                debug!(target: "syncwatch.ws", %connection_id, "Ignoring binary frame");
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(target: "syncwatch.ws", %connection_id, error = %e, "Socket error");
                break;
            },
        }
    }

    handler.disconnect().await;
    state.connection_closed();
    send_task.abort();
    info!(target: "syncwatch.ws", %connection_id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TrustedQueryIdentity;
    use crate::config::Settings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        let state =
            AppState::new(Settings::default(), Arc::new(TrustedQueryIdentity::new())).unwrap();
        create_router(Arc::new(state))
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ws?userId=u-1&name=Alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
