//! Record types for the local replica and the remote wire format.

use crate::{Payload, RecordId, TableName, TenantId, Timestamp};
use serde::{Deserialize, Serialize};

/// Where a record stands relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Matches the last state acknowledged by the remote store
    Synced,
    /// Created or edited locally, waiting for push
    Pending,
    /// Deleted locally, waiting for the remote delete
    PendingDelete,
}

impl SyncStatus {
    /// Whether the record has something to push.
    pub fn is_dirty(self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }

    /// Legal status transitions.
    ///
    /// A local edit sends a synced record back to pending; a pending record
    /// becomes synced once the remote acknowledges it. Anything may be
    /// deleted, but a pending delete is final until the record is purged.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        match (self, next) {
            (Synced, Pending) | (Pending, Pending) | (Pending, Synced) => true,
            (Synced, PendingDelete) | (Pending, PendingDelete) => true,
            (PendingDelete, _) => false,
            (Synced, Synced) => true,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::PendingDelete => write!(f, "pending_delete"),
        }
    }
}

/// A record in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Client-generated id, identical locally and remotely
    pub id: RecordId,
    /// Table this record belongs to
    pub table: TableName,
    pub tenant_id: TenantId,
    /// Field values
    pub payload: Payload,
    pub created_at: Timestamp,
    /// Last local or remote modification
    pub updated_at: Timestamp,
    pub sync_status: SyncStatus,
    /// Local edit counter; remote merges leave it untouched
    pub version: u64,
    /// Server `updated_at` observed at the last pull or push of this id.
    /// `Some` means the record is known to exist remotely.
    pub remote_updated_at: Option<Timestamp>,
}

impl Record {
    /// Create a record authored on this device. It starts as pending.
    pub fn new_local(
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        tenant_id: impl Into<TenantId>,
        payload: Payload,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            table: table.into(),
            tenant_id: tenant_id.into(),
            payload,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            version: 1,
            remote_updated_at: None,
        }
    }

    /// Create a record from a row received from the remote store.
    pub fn from_remote(table: impl Into<TableName>, row: RemoteRow) -> Self {
        Self {
            id: row.id,
            table: table.into(),
            tenant_id: row.tenant_id,
            payload: row.payload,
            created_at: row.updated_at,
            updated_at: row.updated_at,
            sync_status: SyncStatus::Synced,
            version: 0,
            remote_updated_at: Some(row.updated_at),
        }
    }

    /// Whether the record is known to exist in the remote store.
    pub fn is_known_remotely(&self) -> bool {
        self.remote_updated_at.is_some()
    }

    /// Whether consumers of the store should see this record.
    pub fn is_visible(&self) -> bool {
        self.sync_status != SyncStatus::PendingDelete
    }

    /// Wire representation for insert and upsert.
    pub fn to_remote_row(&self) -> RemoteRow {
        RemoteRow {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            updated_at: self.updated_at,
            payload: self.payload.clone(),
        }
    }
}

/// A row as exchanged with the remote store.
///
/// On the wire the payload fields sit next to `id`, `tenant_id` and
/// `updated_at` in one flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub payload: Payload,
}

impl RemoteRow {
    pub fn new(
        id: impl Into<RecordId>,
        tenant_id: impl Into<TenantId>,
        updated_at: Timestamp,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            updated_at,
            payload,
        }
    }
}
