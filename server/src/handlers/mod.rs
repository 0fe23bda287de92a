//! Request handlers for the local API.

mod conflicts;
mod records;
mod websocket;

pub use conflicts::*;
pub use records::*;
pub use websocket::handle_websocket_connection;
