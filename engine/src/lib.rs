//! # Fieldsync Engine
//!
//! The deterministic core of an offline-first sync engine for field-data
//! records (farmers, plots, payments, ...) spread over many interdependent
//! tables.
//!
//! This crate owns the local replica and every decision the sync cycle makes
//! about it. Talking to the remote store, timers and persistence to disk live
//! in the service crate; everything here is pure and takes time as an input.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets or clocks
//! - **Deterministic**: same inputs, same outputs (BTreeMaps everywhere)
//! - **All-or-nothing batches**: a [`WriteBatch`] is fully validated before
//!   any of it is applied
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] carries a client-generated id, a JSON object payload, the
//! tenant it belongs to and a [`SyncStatus`]:
//! - `pending` - created or edited locally, waiting for push
//! - `synced` - matches what the remote store last acknowledged
//! - `pending_delete` - deleted locally, waiting for the remote delete
//!
//! ### Table registry
//!
//! The [`TableRegistry`] gives every table a dependency rank. Creates and
//! updates are processed in ascending rank, deletes in descending rank, so a
//! foreign key never points at a row the remote store has not seen yet.
//!
//! ### Change tracking and conflicts
//!
//! [`ChangeTracker`] derives a [`ChangeSet`] per table from record statuses
//! alone; there is no operation log. Conflicts are detected by comparing the
//! server timestamp cached at the last pull with the live one
//! ([`check_conflict`]) and parked in the [`ConflictLog`] until a human
//! resolves them.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use fieldsync_engine::{ChangeTracker, LocalStore, TableDescriptor, TableRegistry};
//! use serde_json::json;
//!
//! let registry = TableRegistry::new(vec![
//!     TableDescriptor::new("farmers", 10),
//!     TableDescriptor::new("farm_plots", 20).references("farmers"),
//! ])
//! .unwrap();
//!
//! let mut store = LocalStore::new(registry);
//! let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
//!
//! store
//!     .create("farmers", "f-1", "tenant-a", json!({"name": "Amina"}), now)
//!     .unwrap();
//!
//! let changes = ChangeTracker::new(&store).compute_change_set("farmers").unwrap();
//! assert_eq!(changes.created.len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`LocalStore::export_state`] and [`LocalStore::import_state`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod batch;
pub mod conflict;
pub mod error;
pub mod merge;
pub mod record;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod tracker;

// Re-export main types at crate root
pub use batch::{BatchOp, BatchResult, WriteBatch};
pub use conflict::{
    check_conflict, ConflictCheck, ConflictId, ConflictLog, ConflictRecord, ConflictStatus,
    Resolution, SETTLED_CONFLICTS_KEPT,
};
pub use error::Error;
pub use merge::{MergeOutcome, RowMerge};
pub use record::{Record, RemoteRow, SyncStatus};
pub use registry::{FieldDef, FieldType, TableDescriptor, TableRegistry, TableScope};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{LocalStore, QueryBuilder, Table};
pub use tables::field_registry;
pub use tracker::{ChangeSet, ChangeTracker, PendingCounts};

/// Type aliases for clarity
pub type RecordId = String;
pub type TableName = String;
pub type TenantId = String;
pub type Rank = u32;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type Payload = serde_json::Map<String, serde_json::Value>;
