//! Sync endpoint routes.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use fieldsync_engine::{ChangeTracker, PendingCounts, TableName, Timestamp};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::sync::{SchedulerStatus, SyncOutcome};
use crate::AppState;

/// Response for a manual sync.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    /// Human-readable outcome, e.g. `up-to-date` or `skipped: offline`
    pub message: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Response for the sync status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub revision: u64,
    pub pending: PendingCounts,
    pub pending_conflicts: usize,
    pub checkpoints: BTreeMap<TableName, Timestamp>,
}

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync_handler))
        .route("/sync/status", get(status_handler))
}

/// POST /sync - run a cycle now.
///
/// Always answers 200; the outcome says whether the cycle ran.
async fn sync_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<SyncResponse> {
    let outcome = state.scheduler.sync_now().await;
    Json(SyncResponse {
        message: outcome.to_string(),
        outcome,
    })
}

/// GET /sync/status
async fn status_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<SyncStatusResponse>> {
    let scheduler = state.scheduler.status();
    let response = state.store.read(|s| SyncStatusResponse {
        scheduler,
        revision: s.revision(),
        pending: ChangeTracker::new(s).pending_counts(),
        pending_conflicts: s.conflicts().pending_count(),
        checkpoints: s.checkpoints().clone(),
    })?;
    Ok(Json(response))
}
