//! Fieldsync daemon - offline-first sync of the local replica.
//!
//! The daemon owns a durable [`store::SharedStore`], pushes local edits to a
//! remote REST store and pulls remote changes back on a schedule
//! ([`sync::SyncScheduler`]), and exposes the replica to local apps over an
//! HTTP API plus a WebSocket change feed.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod remote;
pub mod routes;
pub mod store;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::store::SharedStore;
use crate::sync::SyncScheduler;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub scheduler: Arc<SyncScheduler>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

/// Build the local API router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
