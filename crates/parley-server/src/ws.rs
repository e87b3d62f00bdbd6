//! WebSocket signaling endpoint.

use crate::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Extension, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parley_types::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Bounded per-connection outbox. 256 messages is ample for normal
/// signaling traffic; beyond that the client is too slow and messages
/// are dropped.
const OUTBOX_CAPACITY: usize = 256;

/// `GET /ws` upgrades to the per-peer signaling channel.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles one signaling connection for its whole lifetime.
///
/// The socket is split: a forwarding task drains the bounded outbox to
/// the peer while this task decodes inbound frames and dispatches them
/// to the session manager. A closed socket is an implicit
/// `stop-voice-session`.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "signaling connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to serialize signaling message: {}", e);
                }
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        match frame {
            WsMessage::Text(text) => {
                let message = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(conn_id = %conn_id, "unparseable signaling frame: {}", e);
                        send_message(
                            &tx,
                            &conn_id,
                            ServerMessage::Error {
                                message: "invalid message format".to_string(),
                                error: None,
                            },
                        );
                        continue;
                    }
                };

                let reply = match state.manager.handle_message(&conn_id, message, &tx).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(conn_id = %conn_id, "signaling command failed: {}", e);
                        ServerMessage::Error {
                            message: e.to_string(),
                            error: None,
                        }
                    }
                };
                send_message(&tx, &conn_id, reply);
            }
            WsMessage::Close(_) => break,
            // Ping/pong frames are answered by axum itself.
            _ => {}
        }
    }

    state.manager.disconnect(&conn_id).await;
    send_task.abort();
    info!(conn_id = %conn_id, "signaling connection closed");
}

fn send_message(tx: &mpsc::Sender<ServerMessage>, conn_id: &str, message: ServerMessage) {
    if let Err(e) = tx.try_send(message) {
        warn!(conn_id = %conn_id, "dropping signaling message for slow consumer: {}", e);
    }
}
