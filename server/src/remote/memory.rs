//! In-process remote store.
//!
//! Behaves like the HTTP backend: the server stamps `updated_at` on every
//! write from its own clock, so device clocks never leak into checkpoints.
//! Failures can be injected per table and the whole store can be taken
//! offline, which is what the sync tests and demos run against.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, TimeZone, Utc};
use fieldsync_engine::{Payload, RecordId, RemoteRow, TableName, Timestamp};
use futures::future;

use super::{Filter, RemoteClient, RemoteError, RemoteFuture, RemoteResult};

/// Kind of call made against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Select,
    Insert,
    Upsert,
    Delete,
}

/// One recorded call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub table: TableName,
    pub ids: Vec<RecordId>,
}

#[derive(Debug)]
struct State {
    tables: BTreeMap<TableName, BTreeMap<RecordId, RemoteRow>>,
    clock: Timestamp,
    failing: BTreeMap<TableName, RemoteError>,
    offline: bool,
    calls: Vec<RemoteCall>,
}

#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// Empty store whose clock starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        Self::with_clock(start.unwrap_or_default())
    }

    pub fn with_clock(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(State {
                tables: BTreeMap::new(),
                clock: start,
                failing: BTreeMap::new(),
                offline: false,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not take the others down with it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// Store rows as-is, keeping their timestamps.
    pub fn seed(&self, table: &str, rows: Vec<RemoteRow>) {
        let mut state = self.lock();
        let stored = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row.id.clone(), row);
        }
    }

    /// Another actor edits a row: the patch is merged and a fresh server
    /// timestamp assigned. Returns that timestamp.
    pub fn edit(&self, table: &str, id: &str, patch: Payload) -> Option<Timestamp> {
        let mut state = self.lock();
        let at = state.tick();
        let row = state.tables.get_mut(table)?.get_mut(id)?;
        row.payload.extend(patch);
        row.updated_at = at;
        Some(at)
    }

    /// Another actor deletes a row.
    pub fn remove(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.lock().tables.get_mut(table)?.remove(id)
    }

    pub fn get(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.lock().tables.get(table)?.get(id).cloned()
    }

    /// All rows of a table in id order.
    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every call on `table` fail with `error` until healed.
    pub fn fail_table(&self, table: &str, error: RemoteError) {
        self.lock().failing.insert(table.to_string(), error);
    }

    pub fn heal_table(&self, table: &str) {
        self.lock().failing.remove(table);
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Tables touched by calls of one kind, in call order.
    pub fn tables_called(&self, op: RemoteOp) -> Vec<TableName> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.table.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record the call and run `f` unless the store is offline or the table
    /// is failing.
    fn call<T>(
        &self,
        op: RemoteOp,
        table: &str,
        ids: Vec<RecordId>,
        f: impl FnOnce(&mut State) -> T,
    ) -> RemoteResult<T> {
        let mut state = self.lock();
        state.calls.push(RemoteCall {
            op,
            table: table.to_string(),
            ids,
        });

        if state.offline {
            return Err(RemoteError::Network("connection refused".into()));
        }
        if let Some(error) = state.failing.get(table) {
            return Err(error.clone());
        }
        Ok(f(&mut state))
    }

    fn write(&self, op: RemoteOp, table: &str, rows: Vec<RemoteRow>) -> RemoteResult<Vec<RemoteRow>> {
        let ids = rows.iter().map(|r| r.id.clone()).collect();
        self.call(op, table, ids, |state| {
            let mut written = Vec::with_capacity(rows.len());
            for mut row in rows {
                let exists = state
                    .tables
                    .get(table)
                    .is_some_and(|stored| stored.contains_key(&row.id));
                if op == RemoteOp::Insert && exists {
                    continue;
                }
                row.updated_at = state.tick();
                state
                    .tables
                    .entry(table.to_string())
                    .or_default()
                    .insert(row.id.clone(), row.clone());
                written.push(row);
            }
            written
        })
    }
}

impl State {
    /// Advance the server clock by one second.
    fn tick(&mut self) -> Timestamp {
        self.clock += Duration::seconds(1);
        self.clock
    }
}

impl RemoteClient for InMemoryRemote {
    fn select<'a>(&'a self, table: &'a str, filter: &'a Filter) -> RemoteFuture<'a, Vec<RemoteRow>> {
        let ids = filter.ids.clone().unwrap_or_default();
        let result = self.call(RemoteOp::Select, table, ids, |state| {
            let mut rows: Vec<RemoteRow> = state
                .tables
                .get(table)
                .map(|rows| rows.values().filter(|r| filter.matches(r)).cloned().collect())
                .unwrap_or_default();
            rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
            rows
        });
        Box::pin(future::ready(result))
    }

    fn insert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>> {
        Box::pin(future::ready(self.write(RemoteOp::Insert, table, rows)))
    }

    fn upsert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>> {
        Box::pin(future::ready(self.write(RemoteOp::Upsert, table, rows)))
    }

    fn delete<'a>(&'a self, table: &'a str, ids: Vec<RecordId>) -> RemoteFuture<'a, ()> {
        let targets: BTreeSet<RecordId> = ids.iter().cloned().collect();
        let result = self.call(RemoteOp::Delete, table, ids, |state| {
            if let Some(rows) = state.tables.get_mut(table) {
                rows.retain(|id, _| !targets.contains(id));
            }
        });
        Box::pin(future::ready(result))
    }

    fn ping(&self) -> RemoteFuture<'_, ()> {
        let result = if self.lock().offline {
            Err(RemoteError::Network("connection refused".into()))
        } else {
            Ok(())
        };
        Box::pin(future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str) -> RemoteRow {
        RemoteRow::new(
            id,
            "t-1",
            Utc.timestamp_opt(0, 0).unwrap(),
            json!({"name": id}).as_object().cloned().unwrap(),
        )
    }

    #[tokio::test]
    async fn writes_are_server_stamped() {
        let remote = InMemoryRemote::new();
        let stored = remote.insert("farmers", vec![row("a"), row("b")]).await.unwrap();

        assert_eq!(stored.len(), 2);
        assert!(stored[0].updated_at < stored[1].updated_at);
        assert_eq!(remote.get("farmers", "a").unwrap().updated_at, stored[0].updated_at);
    }

    #[tokio::test]
    async fn insert_skips_existing_ids() {
        let remote = InMemoryRemote::new();
        remote.insert("farmers", vec![row("a")]).await.unwrap();
        let again = remote.insert("farmers", vec![row("a"), row("b")]).await.unwrap();

        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, "b");
    }

    #[tokio::test]
    async fn select_orders_by_updated_at() {
        let remote = InMemoryRemote::new();
        remote.insert("farmers", vec![row("b"), row("a")]).await.unwrap();
        remote.edit("farmers", "b", json!({"name": "B"}).as_object().cloned().unwrap());

        let rows = remote
            .select("farmers", &Filter::changed_since(None))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failure_injection_and_offline() {
        let remote = InMemoryRemote::new();
        remote.fail_table(
            "farmers",
            RemoteError::Validation {
                status: 422,
                message: "bad".into(),
            },
        );

        assert!(matches!(
            remote.insert("farmers", vec![row("a")]).await,
            Err(RemoteError::Validation { status: 422, .. })
        ));
        assert!(remote.insert("farm_plots", vec![row("p")]).await.is_ok());

        remote.set_offline(true);
        assert!(remote.ping().await.is_err());
        assert!(matches!(
            remote.delete("farm_plots", vec!["p".into()]).await,
            Err(RemoteError::Network(_))
        ));
        assert_eq!(remote.calls().len(), 3);
    }
}
