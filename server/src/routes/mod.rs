//! HTTP route definitions.

mod changes;
mod conflicts;
mod health;
mod records;
mod sync;

pub use sync::{SyncResponse, SyncStatusResponse};

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(records::routes())
        .merge(sync::routes())
        .merge(conflicts::routes())
        .merge(changes::routes())
}
