//! Atomic write batches.
//!
//! The sync cycle never mutates the store record by record. Each phase of
//! each table builds one [`WriteBatch`] and hands it to
//! [`LocalStore::apply_batch`](crate::LocalStore::apply_batch), which either
//! applies every op or none of them.

use crate::{
    conflict::ConflictId, merge::MergeOutcome, Payload, RecordId, RemoteRow, TableName, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    /// The remote store acknowledged a pushed record.
    ///
    /// `pushed_version` is the local version that was sent; if the record was
    /// edited again in the meantime it stays pending and only the cached
    /// server timestamp is refreshed.
    MarkSynced {
        table: TableName,
        id: RecordId,
        pushed_version: u64,
        remote_updated_at: Timestamp,
    },
    /// The remote already had this id when it was inserted.
    ///
    /// Only the cached server timestamp is taken over; the record stays
    /// pending so its local payload still goes out as an update.
    AdoptRemote {
        table: TableName,
        id: RecordId,
        remote_updated_at: Timestamp,
    },
    /// The remote delete was acknowledged; drop the record for good.
    ///
    /// A pending conflict on the record is superseded.
    Purge { table: TableName, id: RecordId },
    /// Apply a row fetched from the remote store.
    MergeRemote { table: TableName, row: RemoteRow },
    /// Move a table checkpoint forward. Never moves it backwards.
    AdvanceCheckpoint { table: TableName, to: Timestamp },
    /// Park a conflicting local edit in the conflict log.
    RecordConflict {
        table: TableName,
        id: RecordId,
        client_payload: Payload,
        server_payload: Option<Payload>,
        server_updated_at: Option<Timestamp>,
        detected_at: Timestamp,
    },
}

impl BatchOp {
    pub fn table(&self) -> &str {
        match self {
            BatchOp::MarkSynced { table, .. }
            | BatchOp::AdoptRemote { table, .. }
            | BatchOp::Purge { table, .. }
            | BatchOp::MergeRemote { table, .. }
            | BatchOp::AdvanceCheckpoint { table, .. }
            | BatchOp::RecordConflict { table, .. } => table,
        }
    }
}

/// An ordered list of ops applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn mark_synced(
        &mut self,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        pushed_version: u64,
        remote_updated_at: Timestamp,
    ) -> &mut Self {
        self.push(BatchOp::MarkSynced {
            table: table.into(),
            id: id.into(),
            pushed_version,
            remote_updated_at,
        })
    }

    pub fn adopt_remote(
        &mut self,
        table: impl Into<TableName>,
        id: impl Into<RecordId>,
        remote_updated_at: Timestamp,
    ) -> &mut Self {
        self.push(BatchOp::AdoptRemote {
            table: table.into(),
            id: id.into(),
            remote_updated_at,
        })
    }

    pub fn purge(&mut self, table: impl Into<TableName>, id: impl Into<RecordId>) -> &mut Self {
        self.push(BatchOp::Purge {
            table: table.into(),
            id: id.into(),
        })
    }

    pub fn merge_remote(&mut self, table: impl Into<TableName>, row: RemoteRow) -> &mut Self {
        self.push(BatchOp::MergeRemote {
            table: table.into(),
            row,
        })
    }

    pub fn advance_checkpoint(&mut self, table: impl Into<TableName>, to: Timestamp) -> &mut Self {
        self.push(BatchOp::AdvanceCheckpoint {
            table: table.into(),
            to,
        })
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct tables touched by this batch.
    pub fn tables(&self) -> BTreeSet<TableName> {
        self.ops.iter().map(|op| op.table().to_string()).collect()
    }
}

/// What a committed batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Records flipped to synced
    pub marked_synced: usize,
    /// Acknowledged records left pending because they were edited mid-push
    pub kept_pending: usize,
    /// Records whose remote copy predates them; still pending
    pub adopted: usize,
    pub purged: usize,
    pub merge: MergeOutcome,
    pub conflicts: Vec<ConflictId>,
}
