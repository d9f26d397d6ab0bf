//! WebSocket endpoint — one logical worker per connection.
//!
//! Each inbound frame message is handled to completion (decode, detect,
//! correlate, respond) before the next message on that connection is read.
//! There is no backpressure and no retry: a failed frame produces a log
//! line and no response.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use uuid::Uuid;

use crate::engine::{EngineError, EngineHandle};
use crate::proto::{ClientEvent, ServerEvent};

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

/// Build the router exposing the `/ws` endpoint.
pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one client connection until it closes or errors.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, "client connected");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(%connection_id, error = %err, "websocket error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let Some(reply) = handle_event(&text, &state, connection_id).await else {
                    continue;
                };
                let json = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(%connection_id, error = %err, "cannot serialize response");
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            Message::Binary(_) => {
                tracing::warn!(%connection_id, "binary message ignored");
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    tracing::info!(%connection_id, "client disconnected");
}

/// Dispatch one inbound event. `None` means no response is sent.
async fn handle_event(text: &str, state: &AppState, connection_id: Uuid) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(%connection_id, error = %err, "unrecognized message; ignoring");
            return None;
        }
    };

    match event {
        // Absent image field: the message is ignored with no response.
        ClientEvent::ProcessFrame { image: None } => None,
        ClientEvent::ProcessFrame {
            image: Some(payload),
        } => match state.engine.process_frame(payload).await {
            Ok(analysis) => Some(ServerEvent::AnalysisResult(analysis)),
            Err(EngineError::Pipeline(err)) => {
                tracing::warn!(%connection_id, error = %err, "frame analysis failed; dropping frame");
                None
            }
            Err(err) => {
                tracing::error!(%connection_id, error = %err, "engine unavailable");
                None
            }
        },
    }
}
