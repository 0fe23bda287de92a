//! The sync cycle.
//!
//! A cycle pushes local changes table by table ([`PushEngine`]), then pulls
//! remote changes past each table's checkpoint ([`PullEngine`]). The
//! [`SyncScheduler`] decides when a cycle runs and makes sure only one runs
//! at a time.

mod connectivity;
mod error;
mod pull;
mod push;
mod scheduler;

pub use connectivity::{monitor, Connectivity};
pub use error::{SyncError, SyncResult};
pub use pull::{PullEngine, PullReport, TablePullReport};
pub use push::{PushEngine, PushReport, TablePushReport};
pub use scheduler::{SchedulerState, SchedulerStatus, SyncOutcome, SyncScheduler, Trigger};

use std::future::Future;
use std::time::Duration;

use fieldsync_engine::{TableDescriptor, TableName};

use crate::remote::{RemoteError, RemoteResult};
use crate::store::SharedStore;

/// Run a remote call under a deadline; expiry becomes [`RemoteError::Timeout`].
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RemoteError::Timeout(limit))?
}

/// Descriptors of `tables` in ascending dependency rank.
pub(crate) fn ordered_tables(
    store: &SharedStore,
    tables: &[TableName],
) -> SyncResult<Vec<TableDescriptor>> {
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    let descriptors = store.read(|s| {
        s.registry()
            .select(&names)
            .map(|selected| selected.into_iter().cloned().collect::<Vec<_>>())
    })??;
    Ok(descriptors)
}
