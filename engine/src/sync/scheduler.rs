//! Background driver for periodic sync cycles.

use super::engine::SyncEngine;
use super::status::SyncStatus;
use crate::network::NetworkStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Pause before the next cycle after `failures` consecutive failed cycles.
///
/// Zero failures gives the plain interval; each failure doubles it, up to
/// `max`.
pub fn backoff_delay(interval: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.min(16));
    interval.saturating_mul(factor).min(max.max(interval))
}

/// Runs [`SyncEngine::run_sync_cycle`] on a timer, on reconnect and on demand.
///
/// Dropping the scheduler without [`stop`](Self::stop) leaves the task
/// running until the runtime shuts down.
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    trigger: Arc<Notify>,
    engine: Arc<SyncEngine>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler. The first cycle runs right away when online.
    pub fn start(engine: Arc<SyncEngine>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let trigger = Arc::new(Notify::new());
        let handle = tokio::spawn(run(engine.clone(), trigger.clone(), shutdown_rx));
        Self {
            shutdown,
            trigger,
            engine,
            handle,
        }
    }

    /// Run a cycle as soon as the scheduler is free.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop, interrupting a running cycle, and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        self.engine.request_stop();
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "sync scheduler task failed");
        }
    }
}

async fn run(engine: Arc<SyncEngine>, trigger: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
    let interval = engine.config().sync_interval();
    let max = engine.config().max_backoff();
    let mut network = engine.network().subscribe();
    let mut failures: u32 = 0;
    let mut next_run = Instant::now();

    tracing::info!(interval_ms = interval.as_millis() as u64, "sync scheduler started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_run) => {}
            _ = trigger.notified() => {}
            changed = network.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *network.borrow_and_update();
                if status != NetworkStatus::Online {
                    continue;
                }
                tracing::debug!("back online, syncing");
                failures = 0;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if !engine.network().is_online() {
            next_run = Instant::now() + interval;
            continue;
        }

        let report = engine.run_sync_cycle().await;
        if *shutdown.borrow() {
            break;
        }
        failures = match report.status {
            SyncStatus::Partial | SyncStatus::Error if !report.deferred => failures.saturating_add(1),
            _ => 0,
        };
        let delay = backoff_delay(interval, max, failures);
        if failures > 0 {
            tracing::warn!(
                failures,
                delay_ms = delay.as_millis() as u64,
                "sync cycle incomplete, backing off"
            );
        }
        next_run = Instant::now() + delay;
    }

    tracing::info!("sync scheduler stopped");
}
