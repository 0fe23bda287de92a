//! Cycle scheduling.
//!
//! States are `Idle -> Running -> Idle`. A trigger starts a cycle only when
//! the scheduler is idle and the device is online; anything arriving while a
//! cycle runs is dropped. There is no mid-cycle cancellation: shutdown waits
//! for the running cycle, which per-call timeouts keep bounded.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use fieldsync_engine::{TableName, TenantId, Timestamp};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{Connectivity, PullEngine, PullReport, PushEngine, PushReport, SyncResult};
use crate::remote::RemoteClient;
use crate::store::SharedStore;

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Manual,
    ConnectivityRegained,
}

/// User-visible result of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncOutcome {
    /// Nothing to push and nothing new remotely
    UpToDate,
    Synced {
        pushed: usize,
        pulled: usize,
        conflicts: usize,
        failed_tables: Vec<TableName>,
    },
    Failed {
        reason: String,
    },
    SkippedOffline,
    SkippedBusy,
}

impl SyncOutcome {
    fn from_reports(push: &PushReport, pull: &PullReport) -> Self {
        let pushed = push.pushed();
        let pulled = pull.applied();
        let conflicts = push.conflicts();

        let mut failed_tables = push.failed_tables();
        failed_tables.extend(pull.failed_tables());
        failed_tables.sort();
        failed_tables.dedup();

        // Adopted records are still pending, so the cycle was not a no-op
        let progressed = pushed > 0 || pulled > 0 || conflicts > 0 || push.adopted() > 0;
        if !progressed {
            if failed_tables.is_empty() {
                return SyncOutcome::UpToDate;
            }
            return SyncOutcome::Failed {
                reason: format!("tables failed: {}", failed_tables.join(", ")),
            };
        }

        SyncOutcome::Synced {
            pushed,
            pulled,
            conflicts,
            failed_tables,
        }
    }

    /// Whether the cycle ran and every table made it.
    pub fn is_success(&self) -> bool {
        match self {
            SyncOutcome::UpToDate => true,
            SyncOutcome::Synced { failed_tables, .. } => failed_tables.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::UpToDate => write!(f, "up-to-date"),
            SyncOutcome::Synced { .. } => write!(f, "synced"),
            SyncOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            SyncOutcome::SkippedOffline => write!(f, "skipped: offline"),
            SyncOutcome::SkippedBusy => write!(f, "skipped: busy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Snapshot of the scheduler for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub online: bool,
    pub cycles_run: u64,
    pub last_trigger: Option<Trigger>,
    pub last_outcome: Option<SyncOutcome>,
    pub last_started_at: Option<Timestamp>,
    pub last_success_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct History {
    cycles_run: u64,
    last_trigger: Option<Trigger>,
    last_outcome: Option<SyncOutcome>,
    last_started_at: Option<Timestamp>,
    last_success_at: Option<Timestamp>,
}

/// Holds the running flag for the duration of a cycle.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight runner of sync cycles.
pub struct SyncScheduler {
    store: SharedStore,
    push: PushEngine,
    pull: PullEngine,
    connectivity: Connectivity,
    running: AtomicBool,
    history: Mutex<History>,
}

impl SyncScheduler {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteClient>,
        connectivity: Connectivity,
        tenant_id: impl Into<TenantId>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            push: PushEngine::new(remote.clone(), store.clone(), call_timeout),
            pull: PullEngine::new(remote, store.clone(), tenant_id, call_timeout),
            store,
            connectivity,
            running: AtomicBool::new(false),
            history: Mutex::new(History::default()),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> SchedulerStatus {
        let history = self.history();
        SchedulerStatus {
            state: if self.is_running() {
                SchedulerState::Running
            } else {
                SchedulerState::Idle
            },
            online: self.connectivity.is_online(),
            cycles_run: history.cycles_run,
            last_trigger: history.last_trigger,
            last_outcome: history.last_outcome.clone(),
            last_started_at: history.last_started_at,
            last_success_at: history.last_success_at,
        }
    }

    /// The "sync now" action.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.trigger(Trigger::Manual).await
    }

    /// Run a cycle unless offline or one is already running.
    pub async fn trigger(&self, trigger: Trigger) -> SyncOutcome {
        if !self.connectivity.is_online() {
            tracing::debug!(trigger = ?trigger, "Sync skipped: offline");
            return SyncOutcome::SkippedOffline;
        }
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            tracing::debug!(trigger = ?trigger, "Sync skipped: cycle already running");
            return SyncOutcome::SkippedBusy;
        };

        let started_at = Utc::now();
        {
            let mut history = self.history();
            history.last_trigger = Some(trigger);
            history.last_started_at = Some(started_at);
        }
        tracing::info!(trigger = ?trigger, "Sync cycle started");

        let outcome = match self.run_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(trigger = ?trigger, error = %e, "Sync cycle aborted");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let mut history = self.history();
        history.cycles_run += 1;
        if outcome.is_success() {
            history.last_success_at = Some(started_at);
        }
        history.last_outcome = Some(outcome.clone());
        drop(history);

        tracing::info!(
            trigger = ?trigger,
            outcome = %outcome,
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "Sync cycle finished"
        );
        outcome
    }

    async fn run_cycle(&self) -> SyncResult<SyncOutcome> {
        let tables: Vec<TableName> = self
            .store
            .read(|s| s.registry().ascending().map(|t| t.name.clone()).collect())?;

        let push = self.push.push(&tables).await?;
        let pull = self.pull.pull(&tables).await?;
        Ok(SyncOutcome::from_reports(&push, &pull))
    }

    /// Background loop: interval timer and connectivity edges until
    /// `shutdown` flips. Outcomes are only logged.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online = self.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();

        tracing::info!(interval_secs = every.as_secs(), "Sync scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let trigger = tokio::select! {
                _ = ticker.tick() => Trigger::Timer,
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    let regained = now_online && !was_online;
                    was_online = now_online;
                    if !regained {
                        continue;
                    }
                    Trigger::ConnectivityRegained
                }
                _ = shutdown.changed() => break,
            };

            self.trigger(trigger).await;
        }

        tracing::info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{TablePullReport, TablePushReport};

    #[test]
    fn outcome_display() {
        assert_eq!(SyncOutcome::UpToDate.to_string(), "up-to-date");
        assert_eq!(SyncOutcome::SkippedOffline.to_string(), "skipped: offline");
        assert_eq!(
            SyncOutcome::Failed {
                reason: "disk full".into()
            }
            .to_string(),
            "failed: disk full"
        );
    }

    #[test]
    fn outcome_serializes_tagged() {
        let outcome = SyncOutcome::Synced {
            pushed: 2,
            pulled: 1,
            conflicts: 0,
            failed_tables: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "synced");
        assert_eq!(json["failedTables"], serde_json::json!([]));
    }

    #[test]
    fn outcome_from_reports() {
        let empty = SyncOutcome::from_reports(&PushReport::default(), &PullReport::default());
        assert_eq!(empty, SyncOutcome::UpToDate);

        let push = PushReport {
            tables: vec![TablePushReport {
                table: "farmers".into(),
                inserted: 2,
                ..TablePushReport::default()
            }],
        };
        let pull = PullReport {
            tables: vec![TablePullReport {
                table: "farm_plots".into(),
                error: Some("network error".into()),
                ..TablePullReport::default()
            }],
        };
        match SyncOutcome::from_reports(&push, &pull) {
            SyncOutcome::Synced {
                pushed,
                failed_tables,
                ..
            } => {
                assert_eq!(pushed, 2);
                assert_eq!(failed_tables, vec!["farm_plots".to_string()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let only_failures = SyncOutcome::from_reports(&PushReport::default(), &pull);
        assert!(matches!(only_failures, SyncOutcome::Failed { .. }));
    }
}
