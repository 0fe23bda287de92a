//! WebSocket handler for the change feed.
//!
//! Handles WebSocket connections: registers them for store change
//! notifications and answers subscribe and ping messages.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::store::SharedStore;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    store: SharedStore,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(tx);

    tracing::info!(conn_id = %conn_id, "Change feed client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &store, &conn_manager, &conn_id);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
                conn_manager.send_to(&conn_id, ServerMessage::error("binary frames not supported"));
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "Change feed client disconnected"
    );
}

/// Process a client message and return a server response.
pub(crate) fn process_message(
    text: &str,
    store: &SharedStore,
    conn_manager: &ConnectionManager,
    conn_id: &str,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return ServerMessage::error(format!("Invalid message format: {}", e)),
    };

    match client_msg {
        ClientMessage::Subscribe { tables } => {
            let unknown = store.read(|s| {
                tables
                    .iter()
                    .find(|t| !s.registry().contains(t))
                    .cloned()
            });
            match unknown {
                Ok(Some(table)) => ServerMessage::error(format!("unknown table: {table}")),
                Ok(None) => {
                    conn_manager.subscribe(conn_id, tables.iter().cloned());
                    tracing::debug!(conn_id = %conn_id, tables = ?tables, "Change feed subscription updated");
                    ServerMessage::Subscribed { tables }
                }
                Err(e) => ServerMessage::error(e.to_string()),
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
