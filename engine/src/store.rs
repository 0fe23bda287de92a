//! LocalStore - the local replica.
//!
//! Holds every record of every registered table, the per-table pull
//! checkpoints and the conflict log. Collaborators mutate it through the
//! CRUD methods, which always leave the touched record dirty; the sync cycle
//! mutates it only through [`LocalStore::apply_batch`].

use crate::{
    batch::{BatchOp, BatchResult, WriteBatch},
    conflict::{ConflictId, ConflictLog, Resolution},
    error::Result,
    merge::RowMerge,
    Error, Payload, Record, RecordId, SyncStatus, TableName, TableRegistry, TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All records of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    records: BTreeMap<RecordId, Record>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a record by ID, including one pending deletion.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records visible to consumers.
    pub fn visible_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| r.is_visible())
    }

    /// All records including those pending deletion, in id order.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Count of visible records.
    pub fn len(&self) -> usize {
        self.visible_records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The local replica.
#[derive(Debug, Clone)]
pub struct LocalStore {
    registry: TableRegistry,
    tables: BTreeMap<TableName, Table>,
    checkpoints: BTreeMap<TableName, Timestamp>,
    conflicts: ConflictLog,
    /// Bumped on every committed mutation
    revision: u64,
}

impl LocalStore {
    /// Create an empty store with one table per registry entry.
    pub fn new(registry: TableRegistry) -> Self {
        let tables = registry
            .ascending()
            .map(|t| (t.name.clone(), Table::new()))
            .collect();

        Self {
            registry,
            tables,
            checkpoints: BTreeMap::new(),
            conflicts: ConflictLog::new(),
            revision: 0,
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub(crate) fn require_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn require_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    // ------------------------------------------------------------------
    // CRUD surface
    // ------------------------------------------------------------------

    /// Create a record. It starts out pending.
    pub fn create(
        &mut self,
        table: &str,
        id: impl Into<RecordId>,
        tenant_id: impl Into<TenantId>,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> Result<&Record> {
        let id = id.into();
        let payload = into_object(payload)?;
        self.registry.require(table)?.validate_payload(&payload)?;

        let records = &mut self.require_table_mut(table)?.records;
        if records.contains_key(&id) {
            return Err(Error::RecordAlreadyExists {
                table: table.to_string(),
                id,
            });
        }

        let record = Record::new_local(table, id.clone(), tenant_id, payload, now);
        records.insert(id.clone(), record);
        self.revision += 1;

        self.require_table(table)?
            .get(&id)
            .ok_or_else(|| not_found(table, &id))
    }

    /// Shallow-merge `patch` into a record's payload and mark it pending.
    pub fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
        now: Timestamp,
    ) -> Result<&Record> {
        let patch = into_object(patch)?;
        let descriptor = self.registry.require(table)?.clone();

        let record = self.visible_record_mut(table, id)?;
        let mut payload = record.payload.clone();
        payload.extend(patch);
        descriptor.validate_payload(&payload)?;

        transition(record, SyncStatus::Pending)?;
        record.payload = payload;
        record.updated_at = now;
        record.version += 1;
        self.revision += 1;

        self.require_table(table)?
            .get(id)
            .ok_or_else(|| not_found(table, id))
    }

    /// Mark a record for deletion. It disappears from queries immediately and
    /// is purged once the remote delete is acknowledged.
    pub fn delete(&mut self, table: &str, id: &str, now: Timestamp) -> Result<()> {
        let record = self.visible_record_mut(table, id)?;
        transition(record, SyncStatus::PendingDelete)?;
        record.updated_at = now;
        record.version += 1;
        self.revision += 1;
        Ok(())
    }

    fn visible_record_mut(&mut self, table: &str, id: &str) -> Result<&mut Record> {
        let record = self
            .require_table_mut(table)?
            .records
            .get_mut(id)
            .ok_or_else(|| not_found(table, id))?;
        if !record.is_visible() {
            return Err(Error::RecordPendingDelete {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(record)
    }

    /// Get a visible record.
    pub fn get(&self, table: &str, id: &str) -> Option<&Record> {
        self.tables
            .get(table)
            .and_then(|t| t.get(id))
            .filter(|r| r.is_visible())
    }

    /// Get a record including one pending deletion.
    pub fn get_including_pending_delete(&self, table: &str, id: &str) -> Option<&Record> {
        self.tables.get(table).and_then(|t| t.get(id))
    }

    /// Query records in a table.
    pub fn query(&self, table: &str) -> Result<QueryBuilder<'_>> {
        self.require_table(table).map(QueryBuilder::new)
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    /// Last instant through which remote changes of `table` are absorbed.
    pub fn checkpoint(&self, table: &str) -> Option<Timestamp> {
        self.checkpoints.get(table).copied()
    }

    pub fn checkpoints(&self) -> &BTreeMap<TableName, Timestamp> {
        &self.checkpoints
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Apply a batch atomically.
    ///
    /// Every op is checked against the current state first; if any check
    /// fails nothing is applied.
    pub fn apply_batch(&mut self, batch: WriteBatch) -> Result<BatchResult> {
        for op in batch.ops() {
            self.check_op(op)?;
        }

        let mut result = BatchResult::default();
        if batch.is_empty() {
            return Ok(result);
        }

        for op in batch.into_ops() {
            self.apply_op(op, &mut result);
        }
        self.revision += 1;
        Ok(result)
    }

    fn check_op(&self, op: &BatchOp) -> Result<()> {
        let table = self.require_table(op.table())?;
        if let BatchOp::Purge { id, .. } = op {
            if let Some(record) = table.get(id) {
                if record.sync_status != SyncStatus::PendingDelete {
                    return Err(Error::IllegalTransition {
                        id: id.clone(),
                        from: record.sync_status.to_string(),
                        to: "removed".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply one pre-checked op. Must not fail.
    fn apply_op(&mut self, op: BatchOp, result: &mut BatchResult) {
        match op {
            BatchOp::MarkSynced {
                table,
                id,
                pushed_version,
                remote_updated_at,
            } => {
                let Some(record) = self.tables.get_mut(&table).and_then(|t| t.records.get_mut(&id))
                else {
                    return;
                };
                record.remote_updated_at = Some(remote_updated_at);
                if record.version == pushed_version && record.sync_status == SyncStatus::Pending {
                    record.sync_status = SyncStatus::Synced;
                    result.marked_synced += 1;
                } else {
                    result.kept_pending += 1;
                }
            }
            BatchOp::AdoptRemote {
                table,
                id,
                remote_updated_at,
            } => {
                if let Some(record) = self.tables.get_mut(&table).and_then(|t| t.records.get_mut(&id))
                {
                    record.remote_updated_at = Some(remote_updated_at);
                    result.adopted += 1;
                }
            }
            BatchOp::Purge { table, id } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    if t.records.remove(&id).is_some() {
                        result.purged += 1;
                    }
                }
                self.conflicts.supersede(&table, &id);
            }
            BatchOp::MergeRemote { table, row } => {
                let Some(t) = self.tables.get_mut(&table) else {
                    return;
                };
                let merge = RowMerge::classify(t.records.get(&row.id), &row);
                match merge {
                    RowMerge::Inserted => {
                        t.records
                            .insert(row.id.clone(), Record::from_remote(table, row));
                    }
                    RowMerge::Updated => {
                        if let Some(record) = t.records.get_mut(&row.id) {
                            record.tenant_id = row.tenant_id;
                            record.payload = row.payload;
                            record.updated_at = row.updated_at;
                            record.remote_updated_at = Some(row.updated_at);
                        }
                    }
                    RowMerge::Unchanged | RowMerge::Skipped => {}
                }
                result.merge.count(merge);
            }
            BatchOp::AdvanceCheckpoint { table, to } => {
                let current = self.checkpoints.entry(table).or_insert(to);
                if to > *current {
                    *current = to;
                }
            }
            BatchOp::RecordConflict {
                table,
                id,
                client_payload,
                server_payload,
                server_updated_at,
                detected_at,
            } => {
                let conflict_id = self.conflicts.record(
                    &table,
                    &id,
                    client_payload,
                    server_payload,
                    server_updated_at,
                    detected_at,
                );
                result.conflicts.push(conflict_id);
            }
        }
    }

    /// Settle a pending conflict.
    ///
    /// See [`Resolution`] for what each strategy does to the local record.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: ConflictId,
        resolution: Resolution,
        now: Timestamp,
    ) -> Result<()> {
        let conflict = self
            .conflicts
            .get(conflict_id)
            .ok_or(Error::ConflictNotFound(conflict_id))?
            .clone();
        if !conflict.is_pending() {
            return Err(Error::ConflictAlreadyResolved(conflict_id));
        }
        if let Resolution::Merged { payload } = &resolution {
            self.registry
                .require(&conflict.table)?
                .validate_payload(payload)?;
        }

        let table = self.require_table_mut(&conflict.table)?;
        match (&resolution, conflict.server_payload) {
            (Resolution::KeepServer, None) => {
                table.records.remove(&conflict.record_id);
            }
            (Resolution::KeepServer, Some(server_payload)) => {
                let record = table
                    .records
                    .get_mut(&conflict.record_id)
                    .ok_or_else(|| not_found(&conflict.table, &conflict.record_id))?;
                // A local delete made after detection is not undone
                transition(record, SyncStatus::Synced)?;
                record.payload = server_payload;
                record.updated_at = conflict.server_updated_at.unwrap_or(now);
                record.remote_updated_at = conflict.server_updated_at;
                record.version += 1;
            }
            (Resolution::KeepLocal, _) | (Resolution::Merged { .. }, _) => {
                let record = table
                    .records
                    .get_mut(&conflict.record_id)
                    .ok_or_else(|| not_found(&conflict.table, &conflict.record_id))?;
                if let Resolution::Merged { payload } = &resolution {
                    transition(record, SyncStatus::Pending)?;
                    record.payload = payload.clone();
                    record.updated_at = now;
                    record.version += 1;
                }
                // The server version becomes the new base; a vanished server
                // row makes the record a fresh insert.
                record.remote_updated_at = conflict.server_updated_at;
            }
        }

        self.conflicts.mark_resolved(conflict_id, resolution, now);
        self.revision += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Export the current state as a snapshot.
    pub fn export_state(&self) -> crate::snapshot::StoreSnapshot {
        let mut snapshot = crate::snapshot::StoreSnapshot::new();
        snapshot.revision = self.revision;
        snapshot.checkpoints = self.checkpoints.clone();
        snapshot.conflicts = self.conflicts.clone();

        for (name, table) in &self.tables {
            if !table.records.is_empty() {
                snapshot
                    .tables
                    .insert(name.clone(), table.records.clone());
            }
        }

        snapshot
    }

    /// Replace the current state with a snapshot's.
    pub fn import_state(&mut self, snapshot: crate::snapshot::StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.registry)?;

        for table in self.tables.values_mut() {
            table.records.clear();
        }
        for (name, records) in snapshot.tables {
            if let Some(table) = self.tables.get_mut(&name) {
                table.records = records;
            }
        }

        self.checkpoints = snapshot.checkpoints;
        self.conflicts = snapshot.conflicts;
        self.revision = snapshot.revision;
        Ok(())
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> crate::snapshot::SnapshotMetadata {
        crate::snapshot::SnapshotMetadata {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            revision: self.revision,
            table_count: self.tables.len(),
            record_count: self.tables.values().map(|t| t.records.len()).sum(),
            pending_count: self
                .tables
                .values()
                .flat_map(|t| t.all_records())
                .filter(|r| r.sync_status.is_dirty())
                .count(),
            conflict_count: self.conflicts.pending_count(),
        }
    }
}

fn into_object(value: serde_json::Value) -> Result<Payload> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidPayload("payload must be an object".into())),
    }
}

fn transition(record: &mut Record, next: SyncStatus) -> Result<()> {
    if !record.sync_status.can_transition_to(next) {
        return Err(Error::IllegalTransition {
            id: record.id.clone(),
            from: record.sync_status.to_string(),
            to: next.to_string(),
        });
    }
    record.sync_status = next;
    Ok(())
}

fn not_found(table: &str, id: &str) -> Error {
    Error::RecordNotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
}

/// Builder for querying records in a table.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    table: &'a Table,
    include_pending_delete: bool,
    tenant_id: Option<String>,
    status: Option<SyncStatus>,
}

impl<'a> QueryBuilder<'a> {
    fn new(table: &'a Table) -> Self {
        Self {
            table,
            include_pending_delete: false,
            tenant_id: None,
            status: None,
        }
    }

    /// Include records waiting for their remote delete.
    pub fn include_pending_delete(mut self) -> Self {
        self.include_pending_delete = true;
        self
    }

    /// Only records of one tenant.
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Only records with the given sync status.
    pub fn status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, record: &Record) -> bool {
        (self.include_pending_delete || record.is_visible())
            && self
                .tenant_id
                .as_deref()
                .map_or(true, |t| record.tenant_id == t)
            && self.status.map_or(true, |s| record.sync_status == s)
    }

    fn iter(&self) -> impl Iterator<Item = &'a Record> + '_ {
        self.table.all_records().filter(|r| self.matches(r))
    }

    /// Get all matching records, in id order.
    pub fn all(self) -> Vec<&'a Record> {
        self.iter().collect()
    }

    /// Get the first matching record.
    pub fn first(self) -> Option<&'a Record> {
        self.iter().next()
    }

    /// Count matching records.
    pub fn count(self) -> usize {
        self.iter().count()
    }

    /// Filter matching records by a predicate on payload.
    pub fn filter<F>(self, predicate: F) -> Vec<&'a Record>
    where
        F: Fn(&Payload) -> bool,
    {
        self.iter().filter(|r| predicate(&r.payload)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldDef, FieldType, TableDescriptor};
    use crate::RemoteRow;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn test_registry() -> TableRegistry {
        TableRegistry::new(vec![
            TableDescriptor::new("farmers", 10).with_fields(vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("age", FieldType::Int),
            ]),
            TableDescriptor::new("farm_plots", 20).references("farmers"),
        ])
        .unwrap()
    }

    fn test_store() -> LocalStore {
        LocalStore::new(test_registry())
    }

    fn remote_row(id: &str, name: &str, secs: i64) -> RemoteRow {
        RemoteRow::new(id, "t-1", at(secs), payload(json!({ "name": name })))
    }

    #[test]
    fn create_store() {
        let store = test_store();
        assert!(store.table("farmers").is_some());
        assert!(store.table("farm_plots").is_some());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn create_marks_pending() {
        let mut store = test_store();
        let record = store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();

        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload["name"], "Amina");
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn create_duplicate() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();

        let result = store.create("farmers", "f-1", "t-1", json!({"name": "Bakari"}), at(1));
        assert!(matches!(result, Err(Error::RecordAlreadyExists { .. })));
    }

    #[test]
    fn create_validates_payload() {
        let mut store = test_store();
        let result = store.create("farmers", "f-1", "t-1", json!({"age": 3}), at(0));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));

        let result = store.create("farmers", "f-1", "t-1", json!(["not", "an", "object"]), at(0));
        assert!(matches!(result, Err(Error::InvalidPayload(_))));

        let result = store.create("crops", "c-1", "t-1", json!({}), at(0));
        assert!(matches!(result, Err(Error::TableNotFound(t)) if t == "crops"));
    }

    #[test]
    fn update_merges_patch_and_marks_pending() {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch.merge_remote("farmers", remote_row("f-1", "Amina", 5));
        store.apply_batch(batch).unwrap();

        let record = store
            .update("farmers", "f-1", json!({"age": 41}), at(10))
            .unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload["name"], "Amina");
        assert_eq!(record.payload["age"], 41);
        assert_eq!(record.version, 1);
        assert_eq!(record.updated_at, at(10));
        assert_eq!(record.remote_updated_at, Some(at(5)));
    }

    #[test]
    fn update_rejects_invalid_patch() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();

        let result = store.update("farmers", "f-1", json!({"age": "old"}), at(1));
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert_eq!(store.get("farmers", "f-1").unwrap().version, 1);
    }

    #[test]
    fn delete_hides_record() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();
        store.delete("farmers", "f-1", at(1)).unwrap();

        assert!(store.get("farmers", "f-1").is_none());
        assert_eq!(store.query("farmers").unwrap().count(), 0);
        let hidden = store.get_including_pending_delete("farmers", "f-1").unwrap();
        assert_eq!(hidden.sync_status, SyncStatus::PendingDelete);

        let result = store.update("farmers", "f-1", json!({"name": "x"}), at(2));
        assert!(matches!(result, Err(Error::RecordPendingDelete { .. })));
        let result = store.delete("farmers", "f-1", at(2));
        assert!(matches!(result, Err(Error::RecordPendingDelete { .. })));
    }

    #[test]
    fn delete_missing_record() {
        let mut store = test_store();
        let result = store.delete("farmers", "nope", at(0));
        assert!(matches!(result, Err(Error::RecordNotFound { .. })));
    }

    #[test]
    fn mark_synced_respects_version() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();
        store
            .create("farmers", "f-2", "t-1", json!({"name": "Bakari"}), at(0))
            .unwrap();
        // f-2 edited again while its first version was being pushed
        store
            .update("farmers", "f-2", json!({"name": "Bakari M."}), at(1))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .mark_synced("farmers", "f-1", 1, at(2))
            .mark_synced("farmers", "f-2", 1, at(2));
        let result = store.apply_batch(batch).unwrap();

        assert_eq!(result.marked_synced, 1);
        assert_eq!(result.kept_pending, 1);
        assert_eq!(store.get("farmers", "f-1").unwrap().sync_status, SyncStatus::Synced);
        let f2 = store.get("farmers", "f-2").unwrap();
        assert_eq!(f2.sync_status, SyncStatus::Pending);
        assert_eq!(f2.remote_updated_at, Some(at(2)));
    }

    #[test]
    fn purge_requires_pending_delete() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();
        store
            .create("farmers", "f-2", "t-1", json!({"name": "Bakari"}), at(0))
            .unwrap();
        store.delete("farmers", "f-2", at(1)).unwrap();
        let revision = store.revision();

        let mut batch = WriteBatch::new();
        batch.purge("farmers", "f-2").purge("farmers", "f-1");
        let result = store.apply_batch(batch);

        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
        // Nothing applied: f-2 is still there
        assert!(store.get_including_pending_delete("farmers", "f-2").is_some());
        assert_eq!(store.revision(), revision);

        let mut batch = WriteBatch::new();
        batch.purge("farmers", "f-2");
        assert_eq!(store.apply_batch(batch).unwrap().purged, 1);
        assert!(store.get_including_pending_delete("farmers", "f-2").is_none());
    }

    #[test]
    fn batch_with_unknown_table_applies_nothing() {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch
            .merge_remote("farmers", remote_row("f-1", "Amina", 1))
            .advance_checkpoint("crops", at(1));

        assert!(store.apply_batch(batch).is_err());
        assert!(store.get("farmers", "f-1").is_none());
    }

    #[test]
    fn merge_remote_is_idempotent() {
        let mut store = test_store();
        let rows = vec![remote_row("f-1", "Amina", 1), remote_row("f-2", "Bakari", 2)];

        let mut batch = WriteBatch::new();
        for row in &rows {
            batch.merge_remote("farmers", row.clone());
        }
        batch.advance_checkpoint("farmers", at(2));
        let first = store.apply_batch(batch.clone()).unwrap();
        let after_once = store.export_state();

        let second = store.apply_batch(batch).unwrap();
        let mut after_twice = store.export_state();

        assert_eq!(first.merge.inserted, 2);
        assert_eq!(second.merge.unchanged, 2);
        after_twice.revision = after_once.revision;
        assert_eq!(after_once, after_twice);
    }

    #[test]
    fn merge_remote_skips_dirty_records() {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch.merge_remote("farmers", remote_row("f-1", "Amina", 1));
        store.apply_batch(batch).unwrap();
        store
            .update("farmers", "f-1", json!({"name": "Amina local"}), at(2))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.merge_remote("farmers", remote_row("f-1", "Amina remote", 3));
        let result = store.apply_batch(batch).unwrap();

        assert_eq!(result.merge.skipped, 1);
        let record = store.get("farmers", "f-1").unwrap();
        assert_eq!(record.payload["name"], "Amina local");
        assert_eq!(record.remote_updated_at, Some(at(1)));
    }

    #[test]
    fn checkpoint_never_moves_backwards() {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch.advance_checkpoint("farmers", at(10));
        store.apply_batch(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.advance_checkpoint("farmers", at(5));
        store.apply_batch(batch).unwrap();

        assert_eq!(store.checkpoint("farmers"), Some(at(10)));
        assert_eq!(store.checkpoint("farm_plots"), None);
    }

    fn conflicted_store() -> (LocalStore, ConflictId) {
        let mut store = test_store();
        let mut batch = WriteBatch::new();
        batch.merge_remote("farmers", remote_row("F1", "Amina", 1));
        store.apply_batch(batch).unwrap();
        store
            .update("farmers", "F1", json!({"name": "Amina local"}), at(2))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.push(BatchOp::RecordConflict {
            table: "farmers".into(),
            id: "F1".into(),
            client_payload: payload(json!({"name": "Amina local"})),
            server_payload: Some(payload(json!({"name": "Amina server"}))),
            server_updated_at: Some(at(3)),
            detected_at: at(4),
        });
        let result = store.apply_batch(batch).unwrap();
        (store, result.conflicts[0])
    }

    #[test]
    fn resolve_keep_local() {
        let (mut store, conflict_id) = conflicted_store();
        store
            .resolve_conflict(conflict_id, Resolution::KeepLocal, at(5))
            .unwrap();

        let record = store.get("farmers", "F1").unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload["name"], "Amina local");
        assert_eq!(record.remote_updated_at, Some(at(3)));
        assert_eq!(store.conflicts().pending_count(), 0);

        let again = store.resolve_conflict(conflict_id, Resolution::KeepLocal, at(6));
        assert!(matches!(again, Err(Error::ConflictAlreadyResolved(_))));
    }

    #[test]
    fn resolve_keep_server() {
        let (mut store, conflict_id) = conflicted_store();
        store
            .resolve_conflict(conflict_id, Resolution::KeepServer, at(5))
            .unwrap();

        let record = store.get("farmers", "F1").unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.payload["name"], "Amina server");
        assert_eq!(record.remote_updated_at, Some(at(3)));
    }

    #[test]
    fn resolve_merged_validates() {
        let (mut store, conflict_id) = conflicted_store();
        let bad = Resolution::Merged {
            payload: payload(json!({"age": 3})),
        };
        assert!(store.resolve_conflict(conflict_id, bad, at(5)).is_err());
        assert_eq!(store.conflicts().pending_count(), 1);

        let merged = Resolution::Merged {
            payload: payload(json!({"name": "Amina merged", "age": 41})),
        };
        store.resolve_conflict(conflict_id, merged, at(5)).unwrap();
        let record = store.get("farmers", "F1").unwrap();
        assert_eq!(record.payload["name"], "Amina merged");
        assert_eq!(record.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn resolve_keep_server_does_not_revive_deleted_record() {
        let (mut store, conflict_id) = conflicted_store();
        store.delete("farmers", "F1", at(5)).unwrap();

        let result = store.resolve_conflict(conflict_id, Resolution::KeepServer, at(6));
        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
        let merged = Resolution::Merged {
            payload: payload(json!({"name": "Amina merged"})),
        };
        assert!(matches!(
            store.resolve_conflict(conflict_id, merged, at(6)),
            Err(Error::IllegalTransition { .. })
        ));

        let record = store.get_including_pending_delete("farmers", "F1").unwrap();
        assert_eq!(record.sync_status, SyncStatus::PendingDelete);
        assert_eq!(record.payload["name"], "Amina local");
        assert_eq!(store.conflicts().pending_count(), 1);
    }

    #[test]
    fn purge_supersedes_pending_conflict() {
        let (mut store, conflict_id) = conflicted_store();
        store.delete("farmers", "F1", at(5)).unwrap();

        let mut batch = WriteBatch::new();
        batch.purge("farmers", "F1");
        store.apply_batch(batch).unwrap();

        assert_eq!(store.conflicts().pending_count(), 0);
        let conflict = store.conflicts().get(conflict_id).unwrap();
        assert_eq!(conflict.status, crate::ConflictStatus::Superseded);
        assert!(matches!(
            store.resolve_conflict(conflict_id, Resolution::KeepLocal, at(6)),
            Err(Error::ConflictAlreadyResolved(_))
        ));
    }

    #[test]
    fn adopt_remote_keeps_record_pending() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina"}), at(0))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.adopt_remote("farmers", "f-1", at(3));
        let result = store.apply_batch(batch).unwrap();

        assert_eq!(result.adopted, 1);
        assert_eq!(result.marked_synced, 0);
        let record = store.get("farmers", "f-1").unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.remote_updated_at, Some(at(3)));
    }

    #[test]
    fn resolve_unknown_conflict() {
        let mut store = test_store();
        let result = store.resolve_conflict(42, Resolution::KeepLocal, at(0));
        assert!(matches!(result, Err(Error::ConflictNotFound(42))));
    }

    #[test]
    fn query_filters() {
        let mut store = test_store();
        store
            .create("farmers", "f-1", "t-1", json!({"name": "Amina", "age": 41}), at(0))
            .unwrap();
        store
            .create("farmers", "f-2", "t-2", json!({"name": "Bakari", "age": 29}), at(0))
            .unwrap();
        store
            .create("farmers", "f-3", "t-1", json!({"name": "Chausiku"}), at(0))
            .unwrap();
        store.delete("farmers", "f-3", at(1)).unwrap();

        let query = store.query("farmers").unwrap();
        assert_eq!(query.count(), 2);

        let tenant = store.query("farmers").unwrap().tenant("t-1").all();
        assert_eq!(tenant.len(), 1);
        assert_eq!(tenant[0].id, "f-1");

        let all = store.query("farmers").unwrap().include_pending_delete().count();
        assert_eq!(all, 3);

        let older = store
            .query("farmers")
            .unwrap()
            .filter(|p| p.get("age").and_then(|a| a.as_i64()).unwrap_or(0) > 30);
        assert_eq!(older.len(), 1);

        let pending = store
            .query("farmers")
            .unwrap()
            .status(SyncStatus::Pending)
            .first()
            .unwrap();
        assert_eq!(pending.id, "f-1");
    }

    #[test]
    fn export_import_roundtrip() {
        let (store, _) = conflicted_store();
        let snapshot = store.export_state();

        let mut restored = test_store();
        restored.import_state(snapshot).unwrap();

        assert_eq!(restored.export_state(), store.export_state());
        assert_eq!(restored.conflicts().pending_count(), 1);
        assert_eq!(restored.revision(), store.revision());
    }

    #[test]
    fn snapshot_metadata_counts() {
        let (store, _) = conflicted_store();
        let meta = store.snapshot_metadata();
        assert_eq!(meta.table_count, 2);
        assert_eq!(meta.record_count, 1);
        assert_eq!(meta.pending_count, 1);
        assert_eq!(meta.conflict_count, 1);
    }
}
