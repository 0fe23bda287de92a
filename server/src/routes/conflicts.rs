//! Conflict routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use fieldsync_engine::{ConflictId, ConflictRecord, Resolution};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{get_conflict, list_conflicts, resolve_conflict, ConflictQuery};
use crate::AppState;

/// Create conflict routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/conflicts", get(list_handler))
        .route("/conflicts/{id}", get(get_handler))
        .route("/conflicts/{id}/resolve", post(resolve_handler))
}

/// GET /conflicts - pending conflicts, or all with `?all=true`.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<Vec<ConflictRecord>>> {
    Ok(Json(list_conflicts(&state.store, query)?))
}

/// GET /conflicts/{id}
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(conflict_id): Path<ConflictId>,
) -> Result<Json<ConflictRecord>> {
    Ok(Json(get_conflict(&state.store, conflict_id)?))
}

/// POST /conflicts/{id}/resolve - body is `{"strategy": "keep_local" | "keep_server" | "merged", ...}`.
async fn resolve_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(conflict_id): Path<ConflictId>,
    Json(resolution): Json<Resolution>,
) -> Result<Json<ConflictRecord>> {
    Ok(Json(
        resolve_conflict(&state.store, conflict_id, resolution).await?,
    ))
}
