//! WebSocket room binding and health endpoint
//!
//! Clients connect to `/ws?role=<examiner|student>&room=<session>`. Both
//! parameters are required; the upgrade is refused with 400 otherwise.

use super::{ConnectionDispatcher, ConnectionDriver};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use examrelay_shared::Identity;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state accessible from Axum handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ConnectionDispatcher>,
    pub start_time: Instant,
}

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub role: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// Build the router serving `/ws` and `/health`
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// peer address identifies the connection on leave.
pub fn router(dispatcher: Arc<ConnectionDispatcher>) -> Router {
    let state = AppState {
        dispatcher,
        start_time: Instant::now(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        sessions: state.dispatcher.registry().len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let identity = match Identity::from_params(params.role.as_deref(), params.room.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(%addr, "upgrade refused: {}", e);
            let body = serde_json::json!({ "error": format!("role and room required: {}", e) });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, addr, identity, state.dispatcher))
}

/// Drive one upgraded WebSocket from join to close
async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    identity: Identity,
    dispatcher: Arc<ConnectionDispatcher>,
) {
    info!(%addr, role = %identity.role, session_id = %identity.session_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(dispatcher.config().outbound_queue_capacity.max(1));

    let mut writer_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let message = match std::str::from_utf8(&payload) {
                Ok(text) => Message::Text(text.to_owned().into()),
                Err(_) => Message::Binary(payload),
            };
            if ws_tx.send(message).await.is_err() {
                break; // Client disconnected
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut driver = ConnectionDriver::new(dispatcher, addr, tx);

    match driver.identify(Ok(identity)) {
        Ok(()) => {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        driver
                            .on_message(Bytes::copy_from_slice(text.as_str().as_bytes()))
                            .await
                    }
                    Ok(Message::Binary(data)) => driver.on_message(data).await,
                    Ok(Message::Close(_)) => {
                        debug!(%addr, "client sent close frame");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        warn!(%addr, "websocket read failed: {}", e);
                        break;
                    }
                }
            }
        }
        Err(e) => info!(%addr, "rejected: {}", e),
    }

    driver.close();
    drop(driver);

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        warn!(%addr, "websocket writer did not drain in time");
        writer_task.abort();
    }
    info!(%addr, "websocket closed");
}
