//! WebSocket connection manager.
//!
//! Tracks change feed subscribers and fans store changes out to them.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use fieldsync_engine::TableName;
use tokio::sync::{broadcast, mpsc};

use super::ServerMessage;
use crate::store::{SharedStore, StoreChange};

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    /// Tables this connection wants to hear about; empty means all
    pub tables: BTreeSet<TableName>,
    pub sender: MessageSender,
}

impl Connection {
    fn wants(&self, change: &StoreChange) -> bool {
        self.tables.is_empty() || change.tables.iter().any(|t| self.tables.contains(t))
    }
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection subscribed to every table.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                tables: BTreeSet::new(),
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            tracing::info!(conn_id = %conn_id, "WebSocket connection unregistered");
        }
    }

    /// Replace a connection's table subscription.
    pub fn subscribe(&self, conn_id: &str, tables: impl IntoIterator<Item = TableName>) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.tables = tables.into_iter().collect();
                true
            }
            None => false,
        }
    }

    /// Notify every connection subscribed to one of the changed tables.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_change(&self, change: &StoreChange) -> usize {
        let mut sent_count = 0;
        let message = ServerMessage::Changed {
            revision: change.revision,
            tables: change.tables.clone(),
        };

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.wants(change) && conn.sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(
            revision = change.revision,
            recipients = sent_count,
            "Broadcast store change"
        );
        sent_count
    }

    /// Send a message to every connection.
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().sender.send(message.clone()).is_ok())
            .count()
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Relay committed store changes to the change feed until the store is
/// dropped.
pub fn spawn_change_forwarder(
    store: &SharedStore,
    manager: Arc<ConnectionManager>,
) -> tokio::task::JoinHandle<()> {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    manager.broadcast_change(&change);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change feed lagged");
                    manager.broadcast_all(ServerMessage::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Change forwarder stopped");
    })
}
