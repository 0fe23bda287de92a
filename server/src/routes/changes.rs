//! Change feed route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Create change feed routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/changes", get(changes_handler))
}

/// GET /changes - upgrade to the WebSocket change feed.
async fn changes_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.store, state.conn_manager)
    })
}
