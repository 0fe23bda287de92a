//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory [`LocalStore`](crate::LocalStore)
//! and durable storage. They hold records, checkpoints and the conflict log,
//! and serialize deterministically.

use crate::{
    conflict::ConflictLog, error::Result, Error, Record, RecordId, TableName, TableRegistry,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Store revision at snapshot time
    pub revision: u64,
    /// Records by table, then by record ID; empty tables are omitted
    pub tables: BTreeMap<TableName, BTreeMap<RecordId, Record>>,
    /// Per-table pull checkpoints
    pub checkpoints: BTreeMap<TableName, Timestamp>,
    pub conflicts: ConflictLog,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            revision: 0,
            tables: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            conflicts: ConflictLog::new(),
        }
    }

    /// Count total records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Count records waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.values())
            .filter(|r| r.sync_status.is_dirty())
            .count()
    }

    /// Validate the snapshot against a registry.
    ///
    /// Every table must be registered and every record must sit under its
    /// own table and id.
    pub fn validate(&self, registry: &TableRegistry) -> Result<()> {
        for name in self.tables.keys().chain(self.checkpoints.keys()) {
            registry.require(name)?;
        }

        for (name, records) in &self.tables {
            for (id, record) in records {
                if &record.table != name || &record.id != id {
                    return Err(Error::InvalidSnapshot(format!(
                        "record '{}/{}' stored under '{}/{}'",
                        record.table, record.id, name, id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about a store (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub revision: u64,
    pub table_count: usize,
    /// Total record count, including records pending deletion
    pub record_count: usize,
    /// Records waiting to be pushed
    pub pending_count: usize,
    /// Unresolved conflicts
    pub conflict_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            revision: snapshot.revision,
            table_count: snapshot.tables.len(),
            record_count: snapshot.record_count(),
            pending_count: snapshot.pending_count(),
            conflict_count: snapshot.conflicts.pending_count(),
        }
    }
}
