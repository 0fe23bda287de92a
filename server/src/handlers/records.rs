//! Record handlers - the CRUD surface of the local replica.

use std::collections::BTreeSet;

use chrono::Utc;
use fieldsync_engine::{Record, SyncStatus, TableName};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::store::SharedStore;

/// Query parameters for listing records.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub tenant: Option<String>,
    pub status: Option<SyncStatus>,
    /// Include records waiting for their remote delete
    #[serde(default)]
    pub include_deleted: bool,
    /// Maximum number of records to return
    pub limit: Option<usize>,
}

/// Response for a record listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordList {
    pub records: Vec<Record>,
    /// Whether more records matched than were returned
    pub has_more: bool,
}

/// Body of a record creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    /// Client-chosen id; a v4 UUID is generated when absent
    pub id: Option<String>,
    /// Defaults to the daemon's tenant
    pub tenant_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Default limit for listings.
const DEFAULT_LIMIT: usize = 100;

/// Maximum limit for listings.
const MAX_LIMIT: usize = 1000;

fn touched(table: &str) -> BTreeSet<TableName> {
    BTreeSet::from([table.to_string()])
}

/// List the records of a table in id order.
pub fn list_records(store: &SharedStore, table: &str, query: ListQuery) -> Result<RecordList> {
    let limit = query
        .limit
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);

    let mut records = store.read(|s| -> fieldsync_engine::error::Result<Vec<Record>> {
        let mut builder = s.query(table)?;
        if query.include_deleted {
            builder = builder.include_pending_delete();
        }
        if let Some(tenant) = query.tenant {
            builder = builder.tenant(tenant);
        }
        if let Some(status) = query.status {
            builder = builder.status(status);
        }
        // One more than requested tells us whether there are more
        Ok(builder.all().into_iter().take(limit + 1).cloned().collect())
    })??;

    let has_more = records.len() > limit;
    records.truncate(limit);
    Ok(RecordList { records, has_more })
}

/// Fetch one visible record.
pub fn get_record(store: &SharedStore, table: &str, id: &str) -> Result<Record> {
    store
        .read(|s| -> fieldsync_engine::error::Result<Option<Record>> {
            s.registry().require(table)?;
            Ok(s.get(table, id).cloned())
        })??
        .ok_or_else(|| AppError::NotFound(format!("record {table}/{id}")))
}

/// Create a pending record.
pub async fn create_record(
    store: &SharedStore,
    default_tenant: &str,
    table: &str,
    request: CreateRecordRequest,
) -> Result<Record> {
    let id = match request.id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::BadRequest("record id must not be empty".into()))
        }
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };
    let tenant_id = request
        .tenant_id
        .unwrap_or_else(|| default_tenant.to_string());

    let record = store
        .write(touched(table), |s| {
            s.create(table, id, tenant_id, request.payload, Utc::now())
                .cloned()
        })
        .await?;

    tracing::debug!(table = %table, id = %record.id, "Record created");
    Ok(record)
}

/// Shallow-merge `patch` into a record.
pub async fn update_record(
    store: &SharedStore,
    table: &str,
    id: &str,
    patch: serde_json::Value,
) -> Result<Record> {
    let record = store
        .write(touched(table), |s| {
            s.update(table, id, patch, Utc::now()).cloned()
        })
        .await?;

    tracing::debug!(table = %table, id = %id, version = record.version, "Record updated");
    Ok(record)
}

/// Mark a record for deletion.
pub async fn delete_record(store: &SharedStore, table: &str, id: &str) -> Result<()> {
    store
        .write(touched(table), |s| s.delete(table, id, Utc::now()))
        .await?;

    tracing::debug!(table = %table, id = %id, "Record marked for deletion");
    Ok(())
}
