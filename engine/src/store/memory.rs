//! In-memory backend.

use super::index::resolve_field;
use super::{
    compare_values, Backend, IndexFilter, LocalStore, OutboxQueue, StorageResult, StoreSnapshot,
    SyncStateTracker,
};
use crate::error::{ConfigError, StorageError};
use crate::{
    CollectionName, EntryId, LocalChange, OutboxEntry, Record, RecordId, Schema, Timestamp,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<CollectionName, BTreeMap<RecordId, Record>>,
    /// Pending entries keyed by sequence number
    outbox: BTreeMap<u64, OutboxEntry>,
    entry_seq: HashMap<EntryId, u64>,
    sync_state: HashMap<CollectionName, Timestamp>,
    next_seq: u64,
    used_bytes: u64,
}

impl MemoryState {
    fn record_size(&self, collection: &str, id: &str) -> u64 {
        self.records
            .get(collection)
            .and_then(|c| c.get(id))
            .map(Record::stored_size)
            .unwrap_or(0)
    }

    /// Bytes in use after applying `change` and `entry`.
    fn projected_usage(&self, change: Option<&LocalChange>, entry: Option<&OutboxEntry>) -> u64 {
        let mut used = self.used_bytes;
        match change {
            Some(LocalChange::Put(record)) => {
                used = used.saturating_sub(self.record_size(&record.collection, &record.id));
                used += record.stored_size();
            }
            Some(LocalChange::Delete { collection, id }) => {
                used = used.saturating_sub(self.record_size(collection, id));
            }
            None => {}
        }
        if let Some(entry) = entry {
            if !self.entry_seq.contains_key(&entry.id) {
                used += entry.stored_size();
            }
        }
        used
    }

    fn put_record(&mut self, record: Record) {
        self.used_bytes = self.projected_usage(Some(&LocalChange::Put(record.clone())), None);
        self.records
            .entry(record.collection.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    fn remove_record(&mut self, collection: &str, id: &str) -> bool {
        let removed = self
            .records
            .get_mut(collection)
            .and_then(|c| c.remove(id));
        match removed {
            Some(record) => {
                self.used_bytes = self.used_bytes.saturating_sub(record.stored_size());
                true
            }
            None => false,
        }
    }

    fn push_entry(&mut self, entry: &OutboxEntry) {
        if self.entry_seq.contains_key(&entry.id) {
            return;
        }
        self.next_seq += 1;
        let mut entry = entry.clone();
        entry.seq = self.next_seq;
        self.used_bytes += entry.stored_size();
        self.entry_seq.insert(entry.id.clone(), entry.seq);
        self.outbox.insert(entry.seq, entry);
    }

    /// Entries of `collection` in replay order; the map is keyed by seq.
    fn pending(&self, collection: &str) -> Vec<OutboxEntry> {
        self.outbox
            .values()
            .filter(|e| e.collection == collection)
            .cloned()
            .collect()
    }
}

/// Backend keeping everything in process memory.
///
/// With a capacity set, any write that would push logical usage past it fails
/// with [`StorageError::QuotaExceeded`], which lets the quota path be
/// exercised without a real disk limit.
pub struct MemoryBackend {
    schema: Arc<Schema>,
    capacity: Option<u64>,
    state: RwLock<MemoryState>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            capacity: None,
            state: RwLock::new(MemoryState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse writes beyond `bytes` of logical usage.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Restore a backend from a snapshot.
    pub fn from_snapshot(schema: Arc<Schema>, snapshot: StoreSnapshot) -> Result<Self, ConfigError> {
        snapshot.validate(&schema)?;

        let backend = Self::new(schema);
        {
            let mut state = backend.state.write();
            for record in snapshot.collections.into_values().flat_map(BTreeMap::into_values) {
                state.put_record(record);
            }
            let mut outbox = snapshot.outbox;
            outbox.sort_by_key(OutboxEntry::order_key);
            for entry in &outbox {
                state.push_entry(entry);
            }
            state.sync_state = snapshot.sync_state.into_iter().collect();
        }
        Ok(backend)
    }

    /// Export the full state.
    pub fn export_snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        let mut snapshot = StoreSnapshot::new();
        for record in state.records.values().flat_map(BTreeMap::values) {
            snapshot.add_record(record.clone());
        }
        snapshot.outbox = state.outbox.values().cloned().collect();
        snapshot.sync_state = state
            .sync_state
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        snapshot
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Io("store is closed".into()))
        } else {
            Ok(())
        }
    }

    fn check_capacity(&self, projected: u64) -> StorageResult<()> {
        match self.capacity {
            Some(quota) if projected > quota => Err(StorageError::QuotaExceeded {
                used: projected,
                quota,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LocalStore for MemoryBackend {
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Record>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state.records.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn get_all(
        &self,
        collection: &str,
        filter: Option<&IndexFilter>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>> {
        self.ensure_open()?;
        let limit = limit.unwrap_or(usize::MAX);
        let state = self.state.read();
        let records = match state.records.get(collection) {
            Some(records) => records,
            None => {
                if let Some(filter) = filter {
                    resolve_field(&self.schema, collection, filter)?;
                }
                return Ok(Vec::new());
            }
        };

        let Some(filter) = filter else {
            return Ok(records.values().take(limit).cloned().collect());
        };

        let field = resolve_field(&self.schema, collection, filter)?;
        let mut matching: Vec<&Record> = records
            .values()
            .filter(|r| filter.matches(r.field(field)))
            .collect();
        matching.sort_by(|a, b| {
            let (Some(x), Some(y)) = (a.field(field), b.field(field)) else {
                return std::cmp::Ordering::Equal;
            };
            compare_values(x, y).then_with(|| a.id.cmp(&b.id))
        });
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn put(&self, record: &Record) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let change = LocalChange::Put(record.clone());
        self.check_capacity(state.projected_usage(Some(&change), None))?;
        state.put_record(record.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        self.ensure_open()?;
        if self.state.write().remove_record(collection, key) {
            Ok(())
        } else {
            Err(StorageError::not_found(collection, key))
        }
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if let Some(records) = state.records.remove(collection) {
            let freed: u64 = records.values().map(Record::stored_size).sum();
            state.used_bytes = state.used_bytes.saturating_sub(freed);
        }
        Ok(())
    }

    async fn scan_oldest(&self, collection: &str, limit: usize) -> StorageResult<Vec<Record>> {
        self.ensure_open()?;
        let state = self.state.read();
        let mut records: Vec<&Record> = state
            .records
            .get(collection)
            .map(|c| c.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records.into_iter().take(limit).cloned().collect())
    }

    async fn count(&self, collection: &str) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .records
            .get(collection)
            .map_or(0, BTreeMap::len))
    }
}

#[async_trait]
impl OutboxQueue for MemoryBackend {
    async fn enqueue(&self, entry: &OutboxEntry) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        self.check_capacity(state.projected_usage(None, Some(entry)))?;
        state.push_entry(entry);
        Ok(())
    }

    async fn peek_oldest(&self, collection: &str) -> StorageResult<Option<OutboxEntry>> {
        self.ensure_open()?;
        Ok(self.state.read().pending(collection).into_iter().next())
    }

    async fn dequeue(&self, entry_id: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if let Some(seq) = state.entry_seq.remove(entry_id) {
            if let Some(entry) = state.outbox.remove(&seq) {
                state.used_bytes = state.used_bytes.saturating_sub(entry.stored_size());
            }
        }
        Ok(())
    }

    async fn list_pending(&self, collection: &str) -> StorageResult<Vec<OutboxEntry>> {
        self.ensure_open()?;
        Ok(self.state.read().pending(collection))
    }

    async fn pending_count(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.state.read().outbox.len())
    }

    async fn pending_record_ids(&self, collection: &str) -> StorageResult<HashSet<RecordId>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .outbox
            .values()
            .filter(|e| e.collection == collection)
            .map(|e| e.record_id.clone())
            .collect())
    }
}

#[async_trait]
impl SyncStateTracker for MemoryBackend {
    async fn get_last_synced(&self, collection: &str) -> StorageResult<Option<Timestamp>> {
        self.ensure_open()?;
        Ok(self.state.read().sync_state.get(collection).copied())
    }

    async fn set_last_synced(&self, collection: &str, timestamp: Timestamp) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let watermark = state.sync_state.entry(collection.to_string()).or_insert(timestamp);
        *watermark = (*watermark).max(timestamp);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn commit(
        &self,
        change: &LocalChange,
        entry: Option<&OutboxEntry>,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();

        if let LocalChange::Delete { collection, id } = change {
            let exists = state.records.get(collection).is_some_and(|c| c.contains_key(id));
            if !exists {
                return Err(StorageError::not_found(collection, id));
            }
        }
        self.check_capacity(state.projected_usage(Some(change), entry))?;

        match change {
            LocalChange::Put(record) => state.put_record(record.clone()),
            LocalChange::Delete { collection, id } => {
                state.remove_record(collection, id);
            }
        }
        if let Some(entry) = entry {
            state.push_entry(entry);
        }
        Ok(())
    }

    async fn evict_unreferenced(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let referenced = state
            .outbox
            .values()
            .any(|e| e.collection == collection && e.record_id == id);
        Ok(!referenced && state.remove_record(collection, id))
    }

    async fn used_bytes(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().used_bytes)
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
