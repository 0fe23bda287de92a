//! The remote store.
//!
//! [`RemoteClient`] is the only door to the shared backend: a REST-like store
//! with per-table `select`, `insert`, `upsert` and `delete`. The push and pull
//! engines hold it behind an `Arc`; nothing else in the daemon talks to it.

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{InMemoryRemote, RemoteCall, RemoteOp};

use std::time::Duration;

use fieldsync_engine::{RecordId, RemoteRow, TenantId, Timestamp};
use futures::future::BoxFuture;

/// Errors raised by a remote store call.
///
/// All of them are table-level: the cycle logs them, leaves the table's
/// records pending and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote rejected request ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed remote response: {0}")]
    Decode(String),

    #[error("invalid remote url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        // The client does not know its own limit; deadline expiry with a
        // known limit comes from `with_timeout` in the sync engines.
        if err.is_timeout() {
            RemoteError::Network(format!("request timed out: {err}"))
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Boxed future returned by every [`RemoteClient`] call.
pub type RemoteFuture<'a, T> = BoxFuture<'a, RemoteResult<T>>;

/// Row filter for [`RemoteClient::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Only rows with `updated_at` strictly after this instant
    pub updated_after: Option<Timestamp>,
    /// Only rows of this tenant
    pub tenant_id: Option<TenantId>,
    /// Only rows with one of these ids
    pub ids: Option<Vec<RecordId>>,
}

impl Filter {
    /// Rows changed since a checkpoint; everything when there is none yet.
    pub fn changed_since(checkpoint: Option<Timestamp>) -> Self {
        Self {
            updated_after: checkpoint,
            ..Self::default()
        }
    }

    /// Rows with the given ids.
    pub fn ids(ids: Vec<RecordId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn matches(&self, row: &RemoteRow) -> bool {
        self.updated_after.map_or(true, |after| row.updated_at > after)
            && self
                .tenant_id
                .as_deref()
                .map_or(true, |tenant| row.tenant_id == tenant)
            && self
                .ids
                .as_ref()
                .map_or(true, |ids| ids.iter().any(|id| *id == row.id))
    }
}

/// A remote store.
///
/// Rows carry the server's `updated_at`; `insert` and `upsert` return the
/// rows as stored so the caller learns the timestamps the server assigned.
pub trait RemoteClient: Send + Sync {
    /// Rows matching `filter`, ordered by `updated_at` ascending.
    fn select<'a>(&'a self, table: &'a str, filter: &'a Filter) -> RemoteFuture<'a, Vec<RemoteRow>>;

    /// Insert new rows. Ids that already exist remotely are left untouched
    /// and missing from the returned rows.
    fn insert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>>;

    /// Insert or overwrite rows by id.
    fn upsert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>>;

    /// Delete rows by id. Unknown ids are ignored.
    fn delete<'a>(&'a self, table: &'a str, ids: Vec<RecordId>) -> RemoteFuture<'a, ()>;

    /// Cheap reachability probe.
    fn ping(&self) -> RemoteFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn row(id: &str, tenant: &str, secs: i64) -> RemoteRow {
        RemoteRow::new(
            id,
            tenant,
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            json!({}).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn filter_combines_conditions() {
        let checkpoint = Utc.timestamp_opt(1_700_000_005, 0).unwrap();
        let filter = Filter::changed_since(Some(checkpoint)).for_tenant("t-1");

        assert!(filter.matches(&row("a", "t-1", 6)));
        assert!(!filter.matches(&row("a", "t-1", 5)));
        assert!(!filter.matches(&row("a", "t-2", 6)));
        assert!(Filter::changed_since(None).matches(&row("a", "t-2", 0)));
    }

    #[test]
    fn id_filter() {
        let filter = Filter::ids(vec!["a".into(), "b".into()]);
        assert!(filter.matches(&row("b", "t-1", 0)));
        assert!(!filter.matches(&row("c", "t-1", 0)));
    }
}
