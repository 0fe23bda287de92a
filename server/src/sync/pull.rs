//! Pull remote changes into the local replica.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_engine::{TableDescriptor, TableName, TableScope, TenantId, Timestamp, WriteBatch};
use serde::Serialize;

use super::{ordered_tables, with_timeout, SyncResult};
use crate::remote::{Filter, RemoteClient};
use crate::store::SharedStore;

/// What one pull did to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePullReport {
    pub table: TableName,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows left alone because the local copy has unpushed changes
    pub skipped: usize,
    /// Checkpoint after the pull
    pub checkpoint: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one pull over many tables. Tables that returned no rows are
/// left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub tables: Vec<TablePullReport>,
}

impl PullReport {
    pub fn table(&self, name: &str) -> Option<&TablePullReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Rows that changed the local replica.
    pub fn applied(&self) -> usize {
        self.tables.iter().map(|t| t.inserted + t.updated).sum()
    }

    pub fn failed_tables(&self) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.table.clone())
            .collect()
    }
}

/// Fetches rows changed since each table's checkpoint and merges them.
pub struct PullEngine<R: ?Sized = dyn RemoteClient> {
    remote: Arc<R>,
    store: SharedStore,
    /// Filter for tenant-scoped tables
    tenant_id: TenantId,
    call_timeout: Duration,
}

impl<R: RemoteClient + ?Sized> PullEngine<R> {
    pub fn new(
        remote: Arc<R>,
        store: SharedStore,
        tenant_id: impl Into<TenantId>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            store,
            tenant_id: tenant_id.into(),
            call_timeout,
        }
    }

    /// Pull `tables` in ascending dependency rank.
    ///
    /// A table that fails keeps its checkpoint and the pull moves on; only
    /// a local store failure aborts.
    pub async fn pull(&self, tables: &[TableName]) -> SyncResult<PullReport> {
        let mut report = PullReport::default();

        for descriptor in ordered_tables(&self.store, tables)? {
            match self.pull_table(&descriptor).await {
                Ok(table_report) if table_report.fetched == 0 => {}
                Ok(table_report) => report.tables.push(table_report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(table = %descriptor.name, error = %e, "Pull failed, checkpoint withheld");
                    let checkpoint = self.store.read(|s| s.checkpoint(&descriptor.name))?;
                    report.tables.push(TablePullReport {
                        table: descriptor.name.clone(),
                        checkpoint,
                        error: Some(e.to_string()),
                        ..TablePullReport::default()
                    });
                }
            }
        }

        Ok(report)
    }

    async fn pull_table(&self, descriptor: &TableDescriptor) -> SyncResult<TablePullReport> {
        let table = descriptor.name.as_str();
        let checkpoint = self.store.read(|s| s.checkpoint(table))?;

        let mut filter = Filter::changed_since(checkpoint);
        if descriptor.scope == TableScope::Tenant {
            filter = filter.for_tenant(self.tenant_id.clone());
        }

        let rows = with_timeout(self.call_timeout, self.remote.select(table, &filter)).await?;
        let mut report = TablePullReport {
            table: table.to_string(),
            fetched: rows.len(),
            checkpoint,
            ..TablePullReport::default()
        };

        // Checkpoint from the server clock, never the device clock
        let Some(newest) = rows.iter().map(|r| r.updated_at).max() else {
            return Ok(report);
        };

        let mut batch = WriteBatch::new();
        for row in rows {
            batch.merge_remote(table, row);
        }
        batch.advance_checkpoint(table, newest);
        let result = self.store.apply_batch(batch).await?;

        report.inserted = result.merge.inserted;
        report.updated = result.merge.updated;
        report.unchanged = result.merge.unchanged;
        report.skipped = result.merge.skipped;
        report.checkpoint = Some(checkpoint.map_or(newest, |current| current.max(newest)));

        tracing::info!(
            table = %table,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "Pulled remote changes"
        );
        Ok(report)
    }
}
