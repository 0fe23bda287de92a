//! Connectivity tracking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::with_timeout;
use crate::remote::RemoteClient;

/// Shared online/offline flag.
///
/// Subscribers see every change; the scheduler treats an offline→online
/// edge as a "connectivity regained" trigger.
#[derive(Debug, Clone)]
pub struct Connectivity {
    state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Probe the remote every `every` and keep `connectivity` current until
/// `shutdown` flips.
pub async fn monitor<R: RemoteClient + ?Sized>(
    remote: Arc<R>,
    connectivity: Connectivity,
    every: Duration,
    probe_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = with_timeout(probe_timeout, remote.ping()).await.is_ok();
                if connectivity.set_online(online) {
                    tracing::info!(online, "Connectivity changed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::debug!("Connectivity monitor stopped");
}
