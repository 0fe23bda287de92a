//! Change feed message protocol.
//!
//! All messages are JSON-encoded and tagged by `type`.

use fieldsync_engine::TableName;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Limit notifications to these tables; an empty list means every table.
    Subscribe {
        #[serde(default)]
        tables: Vec<TableName>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a subscription.
    Subscribed { tables: Vec<TableName> },

    /// The local replica committed a change touching `tables`.
    /// Clients re-run their queries against those tables.
    Changed { revision: u64, tables: Vec<TableName> },

    /// The feed fell behind and dropped notifications; re-read everything.
    Lagged { skipped: u64 },

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
