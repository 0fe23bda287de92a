//! WebSocket change feed.
//!
//! Clients connect to `/changes` and are told whenever the local replica
//! commits, so UIs can re-run their queries instead of polling.

mod manager;
mod protocol;

pub use manager::{spawn_change_forwarder, Connection, ConnectionManager, MessageSender};
pub use protocol::*;
