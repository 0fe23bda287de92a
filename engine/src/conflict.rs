//! Write-write conflict detection and the conflict log.
//!
//! A pending local update conflicts when the remote row changed since the
//! client last observed it. Detection compares server timestamps only; field
//! overlap is never considered, so any concurrent remote write counts.

use crate::{Payload, RecordId, TableName, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a conflict in the log.
pub type ConflictId = u64;

/// Settled conflicts kept for the history view; older ones are dropped.
pub const SETTLED_CONFLICTS_KEPT: usize = 500;

/// Outcome of comparing the cached and live server timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    /// Remote unchanged since last observed; safe to upsert
    Clear,
    /// Remote row was modified by someone else
    Modified,
    /// Remote row no longer exists
    Deleted,
}

impl ConflictCheck {
    pub fn is_conflict(self) -> bool {
        !matches!(self, ConflictCheck::Clear)
    }
}

/// Decide whether a pending update may be pushed.
///
/// `cached` is the server timestamp stored at the last successful pull or
/// push; `live` is the one fetched just before pushing. Anything other than
/// an exact match is a conflict.
pub fn check_conflict(cached: Option<Timestamp>, live: Option<Timestamp>) -> ConflictCheck {
    match (cached, live) {
        (_, None) => ConflictCheck::Deleted,
        (Some(cached), Some(live)) if cached == live => ConflictCheck::Clear,
        _ => ConflictCheck::Modified,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
    /// The record was deleted locally and the delete went out
    Superseded,
}

/// How a human settled a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local edit; it is pushed over the server version next cycle
    KeepLocal,
    /// Discard the local edit and adopt the server version
    KeepServer,
    /// Replace the local payload with a hand-merged one and push it
    Merged { payload: Payload },
}

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub conflict_id: ConflictId,
    pub table: TableName,
    pub record_id: RecordId,
    /// Local payload that was held back
    pub client_payload: Payload,
    /// Server payload at detection time; `None` if the server row is gone
    pub server_payload: Option<Payload>,
    pub server_updated_at: Option<Timestamp>,
    pub detected_at: Timestamp,
    pub status: ConflictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<Timestamp>,
}

impl ConflictRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

/// Durable list of conflicts, stored inside the local replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLog {
    entries: BTreeMap<ConflictId, ConflictRecord>,
    next_id: ConflictId,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a conflict.
    ///
    /// If a pending conflict already exists for the same record it is
    /// refreshed in place, so a record has at most one pending conflict no
    /// matter how many cycles detect it again.
    pub fn record(
        &mut self,
        table: &str,
        record_id: &str,
        client_payload: Payload,
        server_payload: Option<Payload>,
        server_updated_at: Option<Timestamp>,
        detected_at: Timestamp,
    ) -> ConflictId {
        if let Some(existing) = self
            .entries
            .values_mut()
            .find(|c| c.is_pending() && c.table == table && c.record_id == record_id)
        {
            existing.client_payload = client_payload;
            existing.server_payload = server_payload;
            existing.server_updated_at = server_updated_at;
            existing.detected_at = detected_at;
            return existing.conflict_id;
        }

        self.next_id += 1;
        let conflict_id = self.next_id;
        self.entries.insert(
            conflict_id,
            ConflictRecord {
                conflict_id,
                table: table.to_string(),
                record_id: record_id.to_string(),
                client_payload,
                server_payload,
                server_updated_at,
                detected_at,
                status: ConflictStatus::Pending,
                resolution: None,
                resolved_at: None,
            },
        );
        conflict_id
    }

    pub fn get(&self, conflict_id: ConflictId) -> Option<&ConflictRecord> {
        self.entries.get(&conflict_id)
    }

    /// The pending conflict for a record, if any.
    pub fn pending_for(&self, table: &str, record_id: &str) -> Option<&ConflictRecord> {
        self.entries
            .values()
            .find(|c| c.is_pending() && c.table == table && c.record_id == record_id)
    }

    /// All pending conflicts, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.entries.values().filter(|c| c.is_pending())
    }

    /// All conflicts, oldest first.
    pub fn all(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.entries.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn mark_resolved(
        &mut self,
        conflict_id: ConflictId,
        resolution: Resolution,
        now: Timestamp,
    ) {
        if let Some(entry) = self.entries.get_mut(&conflict_id) {
            entry.status = ConflictStatus::Resolved;
            entry.resolution = Some(resolution);
            entry.resolved_at = Some(now);
        }
        self.prune_settled();
    }

    /// Close the pending conflict of a record that no longer exists.
    pub(crate) fn supersede(&mut self, table: &str, record_id: &str) -> Option<ConflictId> {
        let conflict_id = self.pending_for(table, record_id)?.conflict_id;
        if let Some(entry) = self.entries.get_mut(&conflict_id) {
            entry.status = ConflictStatus::Superseded;
        }
        self.prune_settled();
        Some(conflict_id)
    }

    fn prune_settled(&mut self) {
        let settled: Vec<ConflictId> = self
            .entries
            .values()
            .filter(|c| !c.is_pending())
            .map(|c| c.conflict_id)
            .collect();
        let excess = settled.len().saturating_sub(SETTLED_CONFLICTS_KEPT);
        for conflict_id in &settled[..excess] {
            self.entries.remove(conflict_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn exact_match_is_clear() {
        assert_eq!(check_conflict(Some(at(10)), Some(at(10))), ConflictCheck::Clear);
    }

    #[test]
    fn newer_remote_is_conflict() {
        assert_eq!(check_conflict(Some(at(10)), Some(at(11))), ConflictCheck::Modified);
    }

    #[test]
    fn any_mismatch_is_conflict() {
        // An older live value still means the row is not what we last saw.
        assert_eq!(check_conflict(Some(at(10)), Some(at(9))), ConflictCheck::Modified);
        assert_eq!(check_conflict(None, Some(at(9))), ConflictCheck::Modified);
    }

    #[test]
    fn missing_remote_row_is_conflict() {
        assert_eq!(check_conflict(Some(at(10)), None), ConflictCheck::Deleted);
        assert!(ConflictCheck::Deleted.is_conflict());
        assert!(!ConflictCheck::Clear.is_conflict());
    }

    #[test]
    fn record_dedups_pending_conflicts() {
        let mut log = ConflictLog::new();
        let first = log.record(
            "farmers",
            "F1",
            payload(json!({"name": "local"})),
            Some(payload(json!({"name": "server"}))),
            Some(at(5)),
            at(6),
        );
        let second = log.record(
            "farmers",
            "F1",
            payload(json!({"name": "local 2"})),
            Some(payload(json!({"name": "server 2"}))),
            Some(at(7)),
            at(8),
        );

        assert_eq!(first, second);
        assert_eq!(log.len(), 1);
        let conflict = log.get(first).unwrap();
        assert_eq!(conflict.client_payload["name"], "local 2");
        assert_eq!(conflict.server_updated_at, Some(at(7)));
    }

    #[test]
    fn resolved_conflict_is_not_reused() {
        let mut log = ConflictLog::new();
        let first = log.record("farmers", "F1", Payload::new(), None, None, at(1));
        log.mark_resolved(first, Resolution::KeepServer, at(2));

        let second = log.record("farmers", "F1", Payload::new(), None, None, at(3));
        assert_ne!(first, second);
        assert_eq!(log.pending_count(), 1);
        assert_eq!(log.get(first).unwrap().status, ConflictStatus::Resolved);
        assert_eq!(log.get(first).unwrap().resolved_at, Some(at(2)));
    }

    #[test]
    fn supersede_closes_only_the_pending_entry() {
        let mut log = ConflictLog::new();
        let first = log.record("farmers", "F1", Payload::new(), None, None, at(1));
        log.record("farmers", "F2", Payload::new(), None, None, at(1));

        assert_eq!(log.supersede("farmers", "F1"), Some(first));
        assert_eq!(log.get(first).unwrap().status, ConflictStatus::Superseded);
        assert_eq!(log.pending_count(), 1);
        assert_eq!(log.supersede("farmers", "F1"), None);
    }

    #[test]
    fn settled_history_is_bounded() {
        let mut log = ConflictLog::new();
        let open = log.record("farmers", "open", Payload::new(), None, None, at(0));
        for i in 0..SETTLED_CONFLICTS_KEPT + 3 {
            let id = log.record("farmers", &format!("F{i}"), Payload::new(), None, None, at(1));
            log.mark_resolved(id, Resolution::KeepServer, at(2));
        }

        assert_eq!(log.len(), SETTLED_CONFLICTS_KEPT + 1);
        assert!(log.get(open).unwrap().is_pending());
        // Oldest settled entries went first
        assert!(log.get(open + 1).is_none());
        assert!(log.get(open + 3).is_none());
        assert!(log.get(open + 4).is_some());
    }

    #[test]
    fn resolution_serialization() {
        let json = serde_json::to_value(Resolution::KeepLocal).unwrap();
        assert_eq!(json, json!({"strategy": "keep_local"}));

        let parsed: Resolution =
            serde_json::from_value(json!({"strategy": "merged", "payload": {"name": "x"}}))
                .unwrap();
        assert_eq!(
            parsed,
            Resolution::Merged {
                payload: payload(json!({"name": "x"}))
            }
        );
    }
}
