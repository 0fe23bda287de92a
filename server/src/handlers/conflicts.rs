//! Conflict handlers - listing and human resolution.

use std::collections::BTreeSet;

use chrono::Utc;
use fieldsync_engine::{ConflictId, ConflictRecord, Resolution};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::store::SharedStore;

/// Query parameters for listing conflicts.
#[derive(Debug, Default, Deserialize)]
pub struct ConflictQuery {
    /// Include resolved conflicts
    #[serde(default)]
    pub all: bool,
}

/// List pending conflicts, or every conflict with `all`.
pub fn list_conflicts(store: &SharedStore, query: ConflictQuery) -> Result<Vec<ConflictRecord>> {
    Ok(store.read(|s| {
        let log = s.conflicts();
        if query.all {
            log.all().cloned().collect()
        } else {
            log.pending().cloned().collect()
        }
    })?)
}

pub fn get_conflict(store: &SharedStore, conflict_id: ConflictId) -> Result<ConflictRecord> {
    store
        .read(|s| s.conflicts().get(conflict_id).cloned())?
        .ok_or_else(|| AppError::NotFound(format!("conflict {conflict_id}")))
}

/// Settle a pending conflict and return it in its resolved state.
///
/// A kept-local or merged record goes back to pending and is pushed on the
/// next cycle.
pub async fn resolve_conflict(
    store: &SharedStore,
    conflict_id: ConflictId,
    resolution: Resolution,
) -> Result<ConflictRecord> {
    let table = get_conflict(store, conflict_id)?.table;

    let resolved = store
        .write(BTreeSet::from([table.clone()]), |s| {
            s.resolve_conflict(conflict_id, resolution, Utc::now())?;
            s.conflicts()
                .get(conflict_id)
                .cloned()
                .ok_or(fieldsync_engine::Error::ConflictNotFound(conflict_id))
        })
        .await?;

    tracing::info!(
        conflict_id,
        table = %table,
        id = %resolved.record_id,
        "Conflict resolved"
    );
    Ok(resolved)
}
