//! Shared, durable handle on the local replica.
//!
//! The engine's [`LocalStore`] is pure; this wrapper adds what the daemon
//! needs around it: a lock for concurrent access, a snapshot file written
//! after every commit, and a broadcast of [`StoreChange`] events that the
//! change feed and reactive queries subscribe to.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use fieldsync_engine::{
    BatchResult, LocalStore, StoreSnapshot, TableName, TableRegistry, WriteBatch,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

const SNAPSHOT_FILE: &str = "store.json";
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Errors from the local store. Always fatal to a sync cycle.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Engine(#[from] fieldsync_engine::Error),

    #[error("local store lock poisoned")]
    Poisoned,

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Published after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
    pub revision: u64,
    pub tables: Vec<TableName>,
}

struct Inner {
    store: RwLock<LocalStore>,
    /// Serializes writers so snapshots hit the disk in revision order
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
    changes: broadcast::Sender<StoreChange>,
}

/// Cloneable handle on the local replica.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("snapshot_path", &self.inner.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl SharedStore {
    /// A store that lives only in memory.
    pub fn in_memory(store: LocalStore) -> Self {
        Self::build(store, None)
    }

    /// Open the store persisted under `data_dir`, or start empty if there
    /// is no snapshot yet.
    pub async fn open(registry: TableRegistry, data_dir: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(SNAPSHOT_FILE);

        let mut store = LocalStore::new(registry);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                store.import_state(StoreSnapshot::from_json(&json)?)?;
                let meta = store.snapshot_metadata();
                tracing::info!(
                    path = %path.display(),
                    revision = meta.revision,
                    records = meta.record_count,
                    pending = meta.pending_count,
                    "Loaded local store snapshot"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No snapshot found, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self::build(store, Some(path)))
    }

    fn build(store: LocalStore, snapshot_path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(store),
                writer: Mutex::new(()),
                snapshot_path,
                changes,
            }),
        }
    }

    /// Subscribe to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    /// Run a read-only closure against the store.
    pub fn read<T>(&self, f: impl FnOnce(&LocalStore) -> T) -> StoreResult<T> {
        let store = self.inner.store.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&store))
    }

    /// Run a mutation against the store.
    ///
    /// The mutation runs on a copy of the store. When it commits (the
    /// revision moves) the copy is written to the snapshot file and only
    /// then becomes visible, followed by a [`StoreChange`] naming `tables`.
    /// A failed mutation or snapshot write leaves the store untouched.
    pub async fn write<T>(
        &self,
        tables: BTreeSet<TableName>,
        f: impl FnOnce(&mut LocalStore) -> fieldsync_engine::error::Result<T>,
    ) -> StoreResult<T> {
        let _writer = self.inner.writer.lock().await;

        let mut draft = self.read(LocalStore::clone)?;
        let before = draft.revision();
        let value = f(&mut draft)?;
        let revision = draft.revision();
        if revision == before {
            return Ok(value);
        }

        self.persist(&draft).await?;
        *self.inner.store.write().map_err(|_| StoreError::Poisoned)? = draft;

        let _ = self.inner.changes.send(StoreChange {
            revision,
            tables: tables.into_iter().collect(),
        });
        Ok(value)
    }

    /// Apply a sync batch.
    pub async fn apply_batch(&self, batch: WriteBatch) -> StoreResult<BatchResult> {
        self.write(batch.tables(), |store| store.apply_batch(batch))
            .await
    }

    /// Write the snapshot atomically: temp file, then rename over the old one.
    async fn persist(&self, store: &LocalStore) -> StoreResult<()> {
        let Some(path) = &self.inner.snapshot_path else {
            return Ok(());
        };

        let snapshot = store.export_state();
        let json = snapshot.to_json()?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::debug!(revision = snapshot.revision, "Persisted local store snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldsync_engine::TableDescriptor;
    use serde_json::json;

    fn test_registry() -> TableRegistry {
        TableRegistry::new(vec![
            TableDescriptor::new("farmers", 10),
            TableDescriptor::new("farm_plots", 20).references("farmers"),
        ])
        .unwrap()
    }

    fn tables(names: &[&str]) -> BTreeSet<TableName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn write_publishes_change() {
        let store = SharedStore::in_memory(LocalStore::new(test_registry()));
        let mut changes = store.subscribe();

        store
            .write(tables(&["farmers"]), |s| {
                s.create("farmers", "f-1", "t-1", json!({"name": "Amina"}), Utc::now())
                    .map(|_| ())
            })
            .await
            .unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.revision, 1);
        assert_eq!(change.tables, vec!["farmers".to_string()]);
    }

    #[tokio::test]
    async fn failed_write_publishes_nothing() {
        let store = SharedStore::in_memory(LocalStore::new(test_registry()));
        let mut changes = store.subscribe();

        let result = store
            .write(tables(&["crops"]), |s| {
                s.create("crops", "c-1", "t-1", json!({}), Utc::now()).map(|_| ())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Engine(_))));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = SharedStore::open(test_registry(), dir.path()).await.unwrap();
        store
            .write(tables(&["farmers"]), |s| {
                s.create("farmers", "f-1", "t-1", json!({"name": "Amina"}), Utc::now())
                    .map(|_| ())
            })
            .await
            .unwrap();
        drop(store);

        let reopened = SharedStore::open(test_registry(), dir.path()).await.unwrap();
        let name = reopened
            .read(|s| s.get("farmers", "f-1").map(|r| r.payload["name"].clone()))
            .unwrap();
        assert_eq!(name, Some(json!("Amina")));
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::open(test_registry(), dir.path()).await.unwrap();
        let mut changes = store.subscribe();
        std::fs::remove_dir_all(dir.path()).unwrap();

        let create = |s: &mut LocalStore| {
            s.create("farmers", "f-1", "t-1", json!({"name": "Amina"}), Utc::now())
                .map(|_| ())
        };
        let result = store.write(tables(&["farmers"]), create).await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.read(|s| s.get("farmers", "f-1").is_none()).unwrap());
        assert_eq!(store.read(|s| s.revision()).unwrap(), 0);
        assert!(changes.try_recv().is_err());

        // Once the disk is back the same create goes through
        std::fs::create_dir_all(dir.path()).unwrap();
        store.write(tables(&["farmers"]), create).await.unwrap();
        assert!(store.read(|s| s.get("farmers", "f-1").is_some()).unwrap());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "{not json").unwrap();

        let result = SharedStore::open(test_registry(), dir.path()).await;
        assert!(matches!(result, Err(StoreError::Engine(_))));
    }
}
