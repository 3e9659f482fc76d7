//! The sync engine: local read/write facade plus the pull/push cycle.

use super::status::{CollectionReport, SyncEvent, SyncReport, SyncStatus, WriteReceipt};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, WriteMode};
use crate::error::{ConflictError, Error, NetworkError, Result, StorageError, ValidationError};
use crate::merge::{MergeDecision, MergeStrategy};
use crate::network::NetworkObserver;
use crate::quota::QuotaMonitor;
use crate::remote::{replay, RemoteApi};
use crate::store::{Backend, IndexFilter, LocalStore, OutboxQueue, SyncStateTracker};
use crate::{LocalChange, OperationKind, OutboxEntry, Record, Schema, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct CycleState {
    running: bool,
    rerun: bool,
}

/// Clears the running flag even if a cycle unwinds.
struct CycleGuard<'a>(&'a Mutex<CycleState>);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.running = false;
        state.rerun = false;
    }
}

/// Offline-first engine over a local [`Backend`] and a [`RemoteApi`].
///
/// Writes land in the local store at once and, in queued mode, in the outbox
/// within the same commit. [`run_sync_cycle`](Self::run_sync_cycle) pulls
/// remote deltas, merges them, replays the outbox in order, advances
/// watermarks and checks the storage quota.
pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    remote: Arc<dyn RemoteApi>,
    network: Arc<NetworkObserver>,
    schema: Arc<Schema>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    quota: QuotaMonitor,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    last_report: RwLock<Option<SyncReport>>,
    cycle: Mutex<CycleState>,
    stop_requested: AtomicBool,
    /// Held by local writes and by the merge of pulled records, so a merge
    /// never acts on a stale view of the pending entries
    write_gate: AsyncMutex<()>,
}

impl SyncEngine {
    /// Build an engine. The caller keeps ownership of the backend's lifecycle.
    pub fn new(
        backend: Arc<dyn Backend>,
        remote: Arc<dyn RemoteApi>,
        schema: impl Into<Arc<Schema>>,
        config: EngineConfig,
    ) -> Result<Self> {
        let schema = schema.into();
        schema.check()?;
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let quota = QuotaMonitor::new(
            backend.clone(),
            schema.clone(),
            clock.clone(),
            config.quota.clone(),
        );
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            backend,
            remote,
            network: Arc::new(NetworkObserver::default()),
            schema,
            config,
            clock,
            quota,
            status,
            events,
            last_report: RwLock::new(None),
            cycle: Mutex::new(CycleState::default()),
            stop_requested: AtomicBool::new(false),
            write_gate: AsyncMutex::new(()),
        })
    }

    /// Share a network observer with the host platform.
    pub fn with_network(mut self, network: Arc<NetworkObserver>) -> Self {
        self.network = network;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.quota = QuotaMonitor::new(
            self.backend.clone(),
            self.schema.clone(),
            clock.clone(),
            self.config.quota.clone(),
        );
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<NetworkObserver> {
        &self.network
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn quota(&self) -> &QuotaMonitor {
        &self.quota
    }

    // ------------------------------------------------------------------
    // Local facade
    // ------------------------------------------------------------------

    /// Apply a mutation locally and record it for the remote.
    ///
    /// Validation failures return at once and leave no trace. `add` of an
    /// existing record fails with [`ValidationError::AlreadyExists`];
    /// `update` or `delete` of a missing one with [`StorageError::NotFound`].
    /// An update replaces the whole payload.
    ///
    /// In [`WriteMode::Immediate`] the remote is called before the local
    /// commit. If that commit then fails, the error is returned even though
    /// the remote already holds the mutation; the next pull brings its copy
    /// back into the local store.
    pub async fn write(
        &self,
        collection: &str,
        operation: OperationKind,
        id: &str,
        payload: Value,
    ) -> Result<WriteReceipt> {
        let definition = self.schema.require_collection(collection)?;
        if id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if operation != OperationKind::Delete {
            definition.validate_payload(&payload)?;
        }

        let _gate = self.write_gate.lock().await;
        let exists = self.backend.get(collection, id).await?.is_some();
        match operation {
            OperationKind::Add if exists => {
                return Err(ValidationError::AlreadyExists {
                    collection: collection.to_string(),
                    id: id.to_string(),
                }
                .into());
            }
            OperationKind::Update | OperationKind::Delete if !exists => {
                return Err(StorageError::not_found(collection, id).into());
            }
            _ => {}
        }

        let now = self.clock.now();
        let (change, entry_payload) = match operation {
            OperationKind::Add | OperationKind::Update => (
                LocalChange::Put(Record::new(id, collection, payload.clone(), now)),
                payload,
            ),
            OperationKind::Delete => (
                LocalChange::Delete {
                    collection: collection.to_string(),
                    id: id.to_string(),
                },
                Value::Null,
            ),
        };
        let entry = OutboxEntry::new(collection, operation, id, entry_payload, now);
        let mut receipt = WriteReceipt {
            collection: collection.to_string(),
            record_id: id.to_string(),
            operation,
            entry_id: None,
            delivered: false,
            written_at: now,
        };

        if self.should_send_now(collection).await? {
            match self.send(&entry).await {
                Ok(()) => {
                    self.commit_with_quota(&change, None).await?;
                    receipt.delivered = true;
                    tracing::debug!(collection, id, %operation, "write delivered");
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() => {
                    tracing::info!(collection, id, error = %err, "remote unavailable, queueing write");
                }
                Err(err) => return Err(err),
            }
        }

        self.commit_with_quota(&change, Some(&entry)).await?;
        receipt.entry_id = Some(entry.id);
        tracing::debug!(collection, id, %operation, "write queued");
        Ok(receipt)
    }

    /// Add a record under a fresh id.
    pub async fn create(&self, collection: &str, payload: Value) -> Result<WriteReceipt> {
        let id = Record::generate_id();
        self.write(collection, OperationKind::Add, &id, payload).await
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.schema.require_collection(collection)?;
        Ok(self.backend.get(collection, id).await?)
    }

    pub async fn get_all(
        &self,
        collection: &str,
        filter: Option<&IndexFilter>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        self.schema.require_collection(collection)?;
        Ok(self.backend.get_all(collection, filter, limit).await?)
    }

    /// Pending entries of a collection in replay order.
    pub async fn pending(&self, collection: &str) -> Result<Vec<OutboxEntry>> {
        self.schema.require_collection(collection)?;
        Ok(self.backend.list_pending(collection).await?)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.backend.pending_count().await?)
    }

    /// Drop a pending entry, e.g. after the application gave up on it.
    pub async fn discard_entry(&self, entry_id: &str) -> Result<()> {
        self.backend.dequeue(entry_id).await?;
        tracing::info!(entry_id, "pending entry discarded");
        Ok(())
    }

    /// Resolve a conflict in favour of the remote: drop the rejected entry
    /// and replace the local copy with the server's record (or remove it
    /// when the remote has none).
    pub async fn adopt_server_record(&self, conflict: &ConflictError) -> Result<()> {
        let entry = &conflict.entry;
        let _gate = self.write_gate.lock().await;
        self.backend.dequeue(&entry.id).await?;

        match &conflict.server_record {
            Some(record) if record.is_active() => {
                self.commit_with_quota(&LocalChange::Put(record.clone()), None)
                    .await?;
            }
            _ => match self.backend.delete(&entry.collection, &entry.record_id).await {
                Ok(()) | Err(StorageError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            },
        }
        tracing::info!(
            collection = %entry.collection,
            record_id = %entry.record_id,
            "conflict resolved with the server copy"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status and events
    // ------------------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Report of the last completed cycle.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Ask the running cycle to stop at its next step.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn publish(&self, status: SyncStatus) {
        self.status.send_replace(status);
        self.emit(SyncEvent::StatusChanged(status));
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Sync cycle
    // ------------------------------------------------------------------

    /// Run one pull/push pass over every collection.
    ///
    /// A call made while a cycle is running returns a `deferred` report at
    /// once; the running cycle then makes exactly one more pass.
    pub async fn run_sync_cycle(&self) -> SyncReport {
        {
            let mut state = self.cycle.lock();
            if state.running {
                state.rerun = true;
                tracing::debug!("sync cycle already running, rerun scheduled");
                return SyncReport::deferred(self.clock.now());
            }
            state.running = true;
        }
        let _guard = CycleGuard(&self.cycle);

        loop {
            let report = self.cycle_once().await;
            let mut state = self.cycle.lock();
            if state.rerun && !report.stopped {
                state.rerun = false;
                continue;
            }
            return report;
        }
    }

    async fn cycle_once(&self) -> SyncReport {
        self.stop_requested.store(false, Ordering::SeqCst);
        let started_at = self.clock.now();
        self.publish(SyncStatus::Syncing);

        let mut collections = Vec::new();
        let mut stopped = false;
        let online = self.network.is_online();

        for name in self.schema.collection_names() {
            if self.stopping() {
                stopped = true;
                break;
            }
            let report = if online {
                self.sync_collection(name, &mut stopped).await
            } else {
                self.offline_report(name).await
            };
            collections.push(report);
            if stopped {
                break;
            }
        }

        let eviction = match self.quota.check_and_evict().await {
            Ok(eviction) => {
                if eviction.total_evicted() > 0 {
                    self.emit(SyncEvent::Evicted(eviction.clone()));
                }
                Some(eviction)
            }
            Err(err) => {
                tracing::warn!(error = %err, "quota check failed");
                None
            }
        };

        let status = SyncReport::outcome(&collections, stopped);
        let report = SyncReport {
            status,
            started_at,
            finished_at: self.clock.now(),
            collections,
            eviction,
            stopped,
            deferred: false,
        };

        tracing::info!(
            ?status,
            pushed = report.total_pushed(),
            remaining = report.total_remaining(),
            stopped,
            "sync cycle finished"
        );

        self.publish(status);
        *self.last_report.write() = Some(report.clone());
        self.emit(SyncEvent::CycleFinished(report.clone()));
        self.publish(SyncStatus::Idle);
        report
    }

    async fn offline_report(&self, name: &str) -> CollectionReport {
        let mut report = CollectionReport::new(name);
        report.remaining = self
            .backend
            .list_pending(name)
            .await
            .map(|pending| pending.len())
            .unwrap_or_default();
        report.watermark = self.backend.get_last_synced(name).await.ok().flatten();
        report.error = Some(NetworkError::Offline.to_string());
        report
    }

    async fn sync_collection(&self, name: &str, stopped: &mut bool) -> CollectionReport {
        let mut report = CollectionReport::new(name);
        let strategy = self
            .schema
            .get_collection(name)
            .and_then(|c| c.merge_strategy)
            .unwrap_or(self.config.merge_strategy);

        let candidate = match self.pull(name, strategy, &mut report).await {
            Ok(candidate) => {
                report.pulled = true;
                candidate
            }
            Err(err) => {
                tracing::warn!(collection = name, error = %err, "pull failed");
                report.error = Some(err.to_string());
                None
            }
        };

        if self.stopping() {
            *stopped = true;
        } else if let Err(err) = self.push(name, &mut report, stopped).await {
            tracing::warn!(collection = name, error = %err, "push failed");
            report.error.get_or_insert(err.to_string());
        }

        match self.backend.list_pending(name).await {
            Ok(pending) => report.remaining = pending.len(),
            Err(err) => {
                report.error.get_or_insert(err.to_string());
            }
        }

        if report.succeeded() {
            if let Some(watermark) = candidate {
                if let Err(err) = self.backend.set_last_synced(name, watermark).await {
                    report.error = Some(err.to_string());
                }
            }
        }
        report.watermark = self.backend.get_last_synced(name).await.ok().flatten();
        report
    }

    /// Fetch and merge remote changes. Returns the watermark candidate.
    async fn pull(
        &self,
        name: &str,
        strategy: MergeStrategy,
        report: &mut CollectionReport,
    ) -> Result<Option<Timestamp>> {
        let since = self.backend.get_last_synced(name).await?;
        let remote = &*self.remote;
        let records = self
            .config
            .retry
            .run("pull", move || async move {
                remote
                    .fetch_changes(name, since)
                    .await
                    .map_err(|e| e.into_pull_error(name))
            })
            .await?;

        report.received = records.len();
        let _gate = self.write_gate.lock().await;
        let pending = self.backend.pending_record_ids(name).await?;
        let mut candidate: Option<Timestamp> = None;

        for mut incoming in records {
            candidate = candidate.max(Some(incoming.updated_at));
            incoming.collection = name.to_string();

            let local = self.backend.get(name, &incoming.id).await?;
            let decision = strategy.decide(local.as_ref(), &incoming, pending.contains(&incoming.id));
            match decision {
                MergeDecision::KeepLocal => report.merge.kept_local += 1,
                MergeDecision::ApplyRemote if incoming.deleted => {
                    if local.is_some() {
                        match self.backend.delete(name, &incoming.id).await {
                            Ok(()) => report.merge.deleted += 1,
                            Err(StorageError::NotFound { .. }) => {}
                            Err(err) => return Err(err.into()),
                        }
                    }
                }
                MergeDecision::ApplyRemote => {
                    self.commit_with_quota(&LocalChange::Put(incoming), None)
                        .await?;
                    report.merge.applied += 1;
                }
            }
        }

        tracing::debug!(
            collection = name,
            since = ?since,
            received = report.received,
            applied = report.merge.applied,
            kept_local = report.merge.kept_local,
            "pulled remote changes"
        );
        Ok(candidate)
    }

    /// Replay pending entries oldest first, stopping at the first failure.
    async fn push(&self, name: &str, report: &mut CollectionReport, stopped: &mut bool) -> Result<()> {
        for entry in self.backend.list_pending(name).await? {
            if self.stopping() {
                *stopped = true;
                return Ok(());
            }
            match self.send(&entry).await {
                Ok(()) => {
                    self.backend.dequeue(&entry.id).await?;
                    report.pushed += 1;
                }
                Err(err) => {
                    match &err {
                        Error::Conflict(conflict) => {
                            self.emit(SyncEvent::Conflict(conflict.as_ref().clone()))
                        }
                        Error::Validation(rejected) => {
                            self.emit(SyncEvent::Rejected(rejected.clone()))
                        }
                        _ => {}
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<()> {
        let remote = &*self.remote;
        self.config
            .retry
            .run("push", move || async move {
                replay(remote, entry).await.map_err(|e| e.into_error(entry))
            })
            .await
    }

    /// Immediate mode sends directly only when nothing older is waiting, so
    /// per-collection order holds.
    async fn should_send_now(&self, collection: &str) -> Result<bool> {
        if self.config.write_mode != WriteMode::Immediate || !self.network.is_online() {
            return Ok(false);
        }
        Ok(self.backend.peek_oldest(collection).await?.is_none())
    }

    /// Commit, and on `QuotaExceeded` evict once and retry once.
    async fn commit_with_quota(
        &self,
        change: &LocalChange,
        entry: Option<&OutboxEntry>,
    ) -> Result<()> {
        match self.backend.commit(change, entry).await {
            Err(StorageError::QuotaExceeded { used, quota }) => {
                tracing::warn!(used, quota, "storage full, evicting before retrying write");
                let eviction = self.quota.evict_for_space().await?;
                if eviction.total_evicted() > 0 {
                    self.emit(SyncEvent::Evicted(eviction));
                }
                self.backend.commit(change, entry).await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }
}
