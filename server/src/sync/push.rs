//! Push local changes to the remote store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldsync_engine::{
    check_conflict, BatchOp, ChangeSet, ChangeTracker, Record, RecordId, RemoteRow, TableName,
    Timestamp, WriteBatch,
};
use serde::Serialize;

use super::{ordered_tables, with_timeout, SyncResult};
use crate::remote::{Filter, RemoteClient};
use crate::store::SharedStore;

/// What one push did to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePushReport {
    pub table: TableName,
    pub inserted: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub conflicts: usize,
    /// Acknowledged remotely but edited again while in flight
    pub kept_pending: usize,
    /// Already present remotely; pushed as an update next time
    pub adopted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TablePushReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn pushed(&self) -> usize {
        self.inserted + self.upserted + self.deleted
    }

    fn is_empty(&self) -> bool {
        self.pushed() == 0
            && self.conflicts == 0
            && self.kept_pending == 0
            && self.adopted == 0
            && self.error.is_none()
    }

    fn absorb(&mut self, other: TablePushReport) {
        self.inserted += other.inserted;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.conflicts += other.conflicts;
        self.kept_pending += other.kept_pending;
        self.adopted += other.adopted;
        if other.error.is_some() {
            self.error = other.error;
        }
    }
}

/// Result of one push over many tables. Tables with nothing to push are
/// left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub tables: Vec<TablePushReport>,
}

impl PushReport {
    pub fn table(&self, name: &str) -> Option<&TablePushReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn pushed(&self) -> usize {
        self.tables.iter().map(TablePushReport::pushed).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.tables.iter().map(|t| t.conflicts).sum()
    }

    pub fn adopted(&self) -> usize {
        self.tables.iter().map(|t| t.adopted).sum()
    }

    pub fn failed_tables(&self) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.table.clone())
            .collect()
    }

    fn record(&mut self, table_report: TablePushReport) {
        if table_report.is_empty() {
            return;
        }
        match self.tables.iter_mut().find(|t| t.table == table_report.table) {
            Some(existing) => existing.absorb(table_report),
            None => self.tables.push(table_report),
        }
    }
}

/// Uploads pending records.
///
/// Creates and updates go out in ascending dependency rank so parents exist
/// before their children; deletes go out in descending rank so children
/// disappear before their parents.
pub struct PushEngine<R: ?Sized = dyn RemoteClient> {
    remote: Arc<R>,
    store: SharedStore,
    call_timeout: Duration,
}

impl<R: RemoteClient + ?Sized> PushEngine<R> {
    pub fn new(remote: Arc<R>, store: SharedStore, call_timeout: Duration) -> Self {
        Self {
            remote,
            store,
            call_timeout,
        }
    }

    /// Push every pending change of `tables`.
    ///
    /// A remote failure is recorded against its table and the push moves on;
    /// only a local store failure aborts.
    pub async fn push(&self, tables: &[TableName]) -> SyncResult<PushReport> {
        let order = ordered_tables(&self.store, tables)?;
        let mut report = PushReport::default();

        for descriptor in &order {
            let table = descriptor.name.as_str();
            let mut table_report = TablePushReport::new(table);
            let result = self.push_upserts(table, &mut table_report).await;
            report.record(settle(table_report, result, "Push of creates/updates failed")?);
        }

        for descriptor in order.iter().rev() {
            let table = descriptor.name.as_str();
            let mut table_report = TablePushReport::new(table);
            let result = self.push_deletes(table, &mut table_report).await;
            report.record(settle(table_report, result, "Push of deletes failed")?);
        }

        Ok(report)
    }

    fn change_set(&self, table: &str) -> SyncResult<ChangeSet> {
        Ok(self
            .store
            .read(|s| ChangeTracker::new(s).compute_change_set(table))??)
    }

    /// Creates, then updates. What the first phase committed stays in
    /// `report` even if the second one fails.
    async fn push_upserts(&self, table: &str, report: &mut TablePushReport) -> SyncResult<()> {
        let changes = self.change_set(table)?;

        if !changes.created.is_empty() {
            self.push_created(table, &changes.created, report).await?;
        }
        if !changes.updated.is_empty() {
            self.push_updated(table, &changes.updated, report).await?;
        }

        if report.pushed() > 0 || report.conflicts > 0 || report.adopted > 0 {
            tracing::info!(
                table = %table,
                inserted = report.inserted,
                upserted = report.upserted,
                adopted = report.adopted,
                conflicts = report.conflicts,
                "Pushed creates/updates"
            );
        }
        Ok(())
    }

    async fn push_created(
        &self,
        table: &str,
        created: &[Record],
        report: &mut TablePushReport,
    ) -> SyncResult<()> {
        let rows = created.iter().map(Record::to_remote_row).collect();
        let mut stamps = server_stamps(
            with_timeout(self.call_timeout, self.remote.insert(table, rows)).await?,
        );

        // Rows the remote already had were not written. They usually come
        // from an earlier attempt whose local commit never happened, but the
        // local payload may have moved on since; take over the live
        // timestamp and leave the record to the update path.
        let missing: Vec<RecordId> = created
            .iter()
            .filter(|r| !stamps.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect();
        let live = if missing.is_empty() {
            HashMap::new()
        } else {
            server_stamps(
                with_timeout(
                    self.call_timeout,
                    self.remote.select(table, &Filter::ids(missing)),
                )
                .await?,
            )
        };

        let mut batch = WriteBatch::new();
        let mut inserted = 0;
        for record in created {
            if let Some(at) = stamps.remove(&record.id) {
                batch.mark_synced(table, record.id.clone(), record.version, at);
                inserted += 1;
            } else if let Some(at) = live.get(&record.id) {
                batch.adopt_remote(table, record.id.clone(), *at);
            } else {
                tracing::warn!(table = %table, id = %record.id, "Insert not acknowledged, keeping record pending");
            }
        }

        let result = self.store.apply_batch(batch).await?;
        report.inserted += inserted;
        report.kept_pending += result.kept_pending;
        report.adopted += result.adopted;
        Ok(())
    }

    async fn push_updated(
        &self,
        table: &str,
        updated: &[Record],
        report: &mut TablePushReport,
    ) -> SyncResult<()> {
        // Just-in-time check of the live server timestamps
        let ids = updated.iter().map(|r| r.id.clone()).collect();
        let live: HashMap<RecordId, RemoteRow> = with_timeout(
            self.call_timeout,
            self.remote.select(table, &Filter::ids(ids)),
        )
        .await?
        .into_iter()
        .map(|row| (row.id.clone(), row))
        .collect();

        let detected_at = Utc::now();
        let mut conflicts = WriteBatch::new();
        let mut clean = Vec::with_capacity(updated.len());

        for record in updated {
            let live_row = live.get(&record.id);
            let check = check_conflict(record.remote_updated_at, live_row.map(|r| r.updated_at));
            if check.is_conflict() {
                tracing::info!(table = %table, id = %record.id, check = ?check, "Conflict detected");
                conflicts.push(BatchOp::RecordConflict {
                    table: table.to_string(),
                    id: record.id.clone(),
                    client_payload: record.payload.clone(),
                    server_payload: live_row.map(|r| r.payload.clone()),
                    server_updated_at: live_row.map(|r| r.updated_at),
                    detected_at,
                });
            } else {
                clean.push(record);
            }
        }

        if !conflicts.is_empty() {
            report.conflicts += conflicts.len();
            self.store.apply_batch(conflicts).await?;
        }
        if clean.is_empty() {
            return Ok(());
        }

        let rows = clean.iter().map(|r| r.to_remote_row()).collect();
        let stamps = server_stamps(
            with_timeout(self.call_timeout, self.remote.upsert(table, rows)).await?,
        );

        let mut batch = WriteBatch::new();
        for record in clean {
            match stamps.get(&record.id) {
                Some(at) => {
                    batch.mark_synced(table, record.id.clone(), record.version, *at);
                }
                None => {
                    tracing::warn!(table = %table, id = %record.id, "Upsert not acknowledged, keeping record pending");
                }
            }
        }

        let acknowledged = batch.len();
        let result = self.store.apply_batch(batch).await?;
        report.upserted += acknowledged;
        report.kept_pending += result.kept_pending;
        Ok(())
    }

    async fn push_deletes(&self, table: &str, report: &mut TablePushReport) -> SyncResult<()> {
        let changes = self.change_set(table)?;
        if changes.deleted.is_empty() {
            return Ok(());
        }

        with_timeout(
            self.call_timeout,
            self.remote.delete(table, changes.deleted.clone()),
        )
        .await?;

        let mut batch = WriteBatch::new();
        for id in changes.deleted {
            batch.purge(table, id);
        }
        let result = self.store.apply_batch(batch).await?;
        report.deleted = result.purged;

        tracing::info!(table = %table, deleted = report.deleted, "Pushed deletes");
        Ok(())
    }
}

/// Attach a table-level failure to the partial report; local store
/// failures abort the push.
fn settle(
    mut report: TablePushReport,
    result: SyncResult<()>,
    context: &'static str,
) -> SyncResult<TablePushReport> {
    match result {
        Ok(()) => Ok(report),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(table = %report.table, error = %e, "{}", context);
            report.error = Some(e.to_string());
            Ok(report)
        }
    }
}

fn server_stamps(rows: Vec<RemoteRow>) -> HashMap<RecordId, Timestamp> {
    rows.into_iter().map(|row| (row.id, row.updated_at)).collect()
}
