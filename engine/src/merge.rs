//! Classification of remote rows against the local replica.
//!
//! Pull applies every remote row as an upsert, but reports explicitly what
//! each row did so that "new remotely" and "changed remotely" are never
//! conflated.

use crate::{Record, RemoteRow};
use serde::{Deserialize, Serialize};

/// What merging one remote row does to the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowMerge {
    /// The id was unknown locally
    Inserted,
    /// A synced local copy is replaced by the newer remote one
    Updated,
    /// The local copy already matches; applying it again is a no-op
    Unchanged,
    /// The local copy has unpushed changes and is left alone
    Skipped,
}

impl RowMerge {
    /// Classify a row without applying it.
    pub fn classify(local: Option<&Record>, row: &RemoteRow) -> Self {
        match local {
            None => RowMerge::Inserted,
            Some(record) if record.sync_status.is_dirty() => RowMerge::Skipped,
            Some(record)
                if record.remote_updated_at == Some(row.updated_at)
                    && record.payload == row.payload
                    && record.tenant_id == row.tenant_id =>
            {
                RowMerge::Unchanged
            }
            Some(_) => RowMerge::Updated,
        }
    }
}

/// Per-row merge counts for one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl MergeOutcome {
    pub fn count(&mut self, merge: RowMerge) {
        match merge {
            RowMerge::Inserted => self.inserted += 1,
            RowMerge::Updated => self.updated += 1,
            RowMerge::Unchanged => self.unchanged += 1,
            RowMerge::Skipped => self.skipped += 1,
        }
    }

    /// Rows that changed the local replica.
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.skipped
    }
}
