//! Network status observation.
//!
//! The platform (or the built-in reachability probe) reports transitions
//! through [`NetworkObserver::set_status`]. Interested parties either register
//! a callback or hold a `watch` receiver.

use crate::remote::RemoteApi;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connectivity as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Handle for removing a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

/// Tracks connectivity and fans transitions out to listeners.
pub struct NetworkObserver {
    status: watch::Sender<NetworkStatus>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl NetworkObserver {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status,
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Report the current connectivity. Returns whether it changed; callbacks
    /// only run on a change.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!(?status, "network status changed");
        // Run callbacks outside the lock so they may register or remove others
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(status);
        }
        true
    }

    /// Register a callback for transitions.
    pub fn on_status_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Poll `remote.ping()` every `interval` and report the result until
    /// `shutdown` flips to `true`.
    pub fn spawn_probe(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteApi>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = match remote.ping().await {
                            Ok(()) => NetworkStatus::Online,
                            Err(err) => {
                                tracing::debug!(error = %err, "reachability probe failed");
                                NetworkStatus::Offline
                            }
                        };
                        observer.set_status(status);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("reachability probe stopped");
        })
    }
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}
