//! Record CRUD routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use fieldsync_engine::Record;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    create_record, delete_record, get_record, list_records, update_record, CreateRecordRequest,
    ListQuery, RecordList,
};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tables/{table}/records",
            get(list_handler).post(create_handler),
        )
        .route(
            "/tables/{table}/records/{id}",
            get(get_handler).patch(update_handler).delete(delete_handler),
        )
}

/// GET /tables/{table}/records
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(table): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RecordList>> {
    Ok(Json(list_records(&state.store, &table, query)?))
}

/// POST /tables/{table}/records
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(table): Path<String>,
    Json(request): Json<CreateRecordRequest>,
) -> Result<(StatusCode, Json<Record>)> {
    let record = create_record(&state.store, &state.config.tenant_id, &table, request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /tables/{table}/records/{id}
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Record>> {
    Ok(Json(get_record(&state.store, &table, &id)?))
}

/// PATCH /tables/{table}/records/{id} - shallow merge of the body into the payload.
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<Record>> {
    Ok(Json(update_record(&state.store, &table, &id, patch).await?))
}

/// DELETE /tables/{table}/records/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    delete_record(&state.store, &table, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
