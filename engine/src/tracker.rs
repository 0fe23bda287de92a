//! Change tracking.
//!
//! There is no operation log: what needs pushing is derived from record
//! statuses alone. A dirty record that the remote store has never seen is a
//! create, one it has seen is an update, and a pending delete is a delete.

use crate::{error::Result, LocalStore, Record, RecordId, SyncStatus, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pending local changes of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub table: TableName,
    /// Pending records never seen remotely
    pub created: Vec<Record>,
    /// Pending records the remote store already has
    pub updated: Vec<Record>,
    /// Ids of records pending deletion
    pub deleted: Vec<RecordId>,
}

impl ChangeSet {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of dirty records per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCounts {
    pub total: usize,
    /// Only tables with at least one dirty record
    pub tables: BTreeMap<TableName, usize>,
}

/// Read-only view that derives change sets from a store.
#[derive(Debug, Clone, Copy)]
pub struct ChangeTracker<'a> {
    store: &'a LocalStore,
}

impl<'a> ChangeTracker<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Compute the pending changes of one table, in id order.
    ///
    /// Fails only when the table is unknown to the store.
    pub fn compute_change_set(&self, table: &str) -> Result<ChangeSet> {
        let records = self.store.require_table(table)?;
        let mut changes = ChangeSet::new(table);

        for record in records.all_records() {
            match record.sync_status {
                SyncStatus::Synced => {}
                SyncStatus::Pending if record.is_known_remotely() => {
                    changes.updated.push(record.clone())
                }
                SyncStatus::Pending => changes.created.push(record.clone()),
                SyncStatus::PendingDelete => changes.deleted.push(record.id.clone()),
            }
        }

        Ok(changes)
    }

    /// Dirty record counts over every registered table.
    pub fn pending_counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for descriptor in self.store.registry().ascending() {
            let dirty = self
                .store
                .table(&descriptor.name)
                .map(|t| t.all_records().filter(|r| r.sync_status.is_dirty()).count())
                .unwrap_or(0);
            if dirty > 0 {
                counts.total += dirty;
                counts.tables.insert(descriptor.name.clone(), dirty);
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, RemoteRow, TableDescriptor, TableRegistry, Timestamp, WriteBatch};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn test_store() -> LocalStore {
        let registry = TableRegistry::new(vec![
            TableDescriptor::new("farmers", 10),
            TableDescriptor::new("farm_plots", 20).references("farmers"),
        ])
        .unwrap();
        LocalStore::new(registry)
    }

    fn remote(id: &str) -> RemoteRow {
        RemoteRow::new(id, "t-1", at(1), json!({"name": id}).as_object().cloned().unwrap())
    }

    #[test]
    fn partitions_by_remote_knowledge() {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch
            .merge_remote("farmers", remote("f-known"))
            .merge_remote("farmers", remote("f-gone"))
            .merge_remote("farmers", remote("f-clean"));
        store.apply_batch(batch).unwrap();

        store
            .create("farmers", "f-new", "t-1", json!({"name": "new"}), at(2))
            .unwrap();
        store
            .update("farmers", "f-known", json!({"name": "edited"}), at(2))
            .unwrap();
        store.delete("farmers", "f-gone", at(2)).unwrap();

        let changes = ChangeTracker::new(&store)
            .compute_change_set("farmers")
            .unwrap();

        assert_eq!(changes.created.len(), 1);
        assert_eq!(changes.created[0].id, "f-new");
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].id, "f-known");
        assert_eq!(changes.deleted, vec!["f-gone".to_string()]);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn has_no_side_effects() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "a"}), at(0))
            .unwrap();
        let before = store.export_state();

        let tracker = ChangeTracker::new(&store);
        tracker.compute_change_set("farmers").unwrap();
        tracker.compute_change_set("farmers").unwrap();

        assert_eq!(store.export_state(), before);
    }

    #[test]
    fn empty_and_unknown_tables() {
        let store = test_store();
        let tracker = ChangeTracker::new(&store);
        assert!(tracker.compute_change_set("farm_plots").unwrap().is_empty());
        assert!(matches!(
            tracker.compute_change_set("crops"),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn pending_counts_per_table() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({}), at(0))
            .unwrap();
        store
            .create("farm_plots", "p-1", "t-1", json!({}), at(0))
            .unwrap();
        store
            .create("farm_plots", "p-2", "t-1", json!({}), at(0))
            .unwrap();

        let counts = ChangeTracker::new(&store).pending_counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.tables["farm_plots"], 2);
        assert_eq!(counts.tables["farmers"], 1);
    }
}
