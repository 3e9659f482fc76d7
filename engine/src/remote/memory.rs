//! In-process remote.

use super::{RemoteApi, RemoteError};
use crate::error::NetworkError;
use crate::{CollectionName, Record, RecordId, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// A call observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Fetch {
        collection: CollectionName,
        since: Option<Timestamp>,
    },
    Create {
        collection: CollectionName,
        id: RecordId,
    },
    Update {
        collection: CollectionName,
        id: RecordId,
    },
    Delete {
        collection: CollectionName,
        id: RecordId,
    },
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<(CollectionName, RecordId), Record>,
    last_timestamp: Timestamp,
    reachable: bool,
    push_failures: VecDeque<RemoteError>,
    pull_failures: VecDeque<RemoteError>,
    calls: Vec<RemoteCall>,
}

impl RemoteState {
    fn stamp(&mut self) -> Timestamp {
        self.last_timestamp += 1;
        self.last_timestamp
    }

    fn gate(&self) -> Result<(), RemoteError> {
        if self.reachable {
            Ok(())
        } else {
            Err(NetworkError::Unreachable("remote is down".into()).into())
        }
    }

    fn injected_push(&mut self) -> Result<(), RemoteError> {
        self.gate()?;
        match self.push_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// [`RemoteApi`] kept in memory, with the same acceptance rules as the
/// reference server: strictly increasing timestamps, idempotent create and
/// delete, rejection of writes to deleted or unknown records.
///
/// Failures can be injected per call to exercise retry and conflict paths.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::starting_at(1_000_000)
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamps handed out start right after `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                last_timestamp: start,
                reachable: true,
                ..RemoteState::default()
            }),
        }
    }

    /// Write a record as another client would. Returns the stored copy.
    pub fn upsert(&self, collection: &str, id: &str, payload: serde_json::Value) -> Record {
        let mut state = self.state.lock();
        let record = Record::new(id, collection, payload, state.stamp());
        state
            .records
            .insert((collection.to_string(), id.to_string()), record.clone());
        record
    }

    /// Delete a record as another client would, leaving a tombstone.
    pub fn remove(&self, collection: &str, id: &str) {
        let mut state = self.state.lock();
        let tombstone = Record::tombstone(id, collection, state.stamp());
        state
            .records
            .insert((collection.to_string(), id.to_string()), tombstone);
    }

    /// Current remote copy, tombstones included.
    pub fn record(&self, collection: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .records
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Live records of a collection.
    pub fn live_records(&self, collection: &str) -> Vec<Record> {
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.collection == collection && r.is_active())
            .cloned()
            .collect()
    }

    /// Make every call fail as unreachable (or recover).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Fail the next `times` create/update/delete calls with `err`.
    pub fn fail_pushes(&self, times: usize, err: RemoteError) {
        let mut state = self.state.lock();
        state
            .push_failures
            .extend(std::iter::repeat(err).take(times));
    }

    /// Fail the next `times` fetch calls with `err`.
    pub fn fail_pulls(&self, times: usize, err: RemoteError) {
        let mut state = self.state.lock();
        state
            .pull_failures
            .extend(std::iter::repeat(err).take(times));
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Number of push calls (create, update, delete) received.
    pub fn push_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, RemoteCall::Fetch { .. }))
            .count()
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn fetch_changes(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Fetch {
            collection: collection.to_string(),
            since,
        });
        state.gate()?;
        if let Some(err) = state.pull_failures.pop_front() {
            return Err(err);
        }

        let mut changed: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.collection == collection && since.map_or(true, |s| r.updated_at > s))
            .cloned()
            .collect();
        changed.sort_by_key(|r| r.updated_at);
        Ok(changed)
    }

    async fn create(&self, record: &Record) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Create {
            collection: record.collection.clone(),
            id: record.id.clone(),
        });
        state.injected_push()?;

        if record.id.is_empty() {
            return Err(RemoteError::Invalid("record id must not be empty".into()));
        }
        let key = (record.collection.clone(), record.id.clone());
        // a tombstoned id may be created again
        if let Some(existing) = state.records.get(&key).filter(|r| r.is_active()) {
            if existing.payload == record.payload {
                return Ok(());
            }
            return Err(RemoteError::Rejected {
                server_record: Some(existing.clone()),
                reason: "record already exists".into(),
            });
        }

        let stored = Record::new(
            record.id.clone(),
            record.collection.clone(),
            record.payload.clone(),
            state.stamp(),
        );
        state.records.insert(key, stored);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        state.injected_push()?;

        let key = (collection.to_string(), id.to_string());
        match state.records.get(&key).cloned() {
            None => Err(RemoteError::Rejected {
                server_record: None,
                reason: "record does not exist on the remote".into(),
            }),
            Some(existing) if !existing.is_active() => Err(RemoteError::Rejected {
                server_record: Some(existing),
                reason: "record was deleted".into(),
            }),
            Some(_) => {
                let stamped = Record::new(id, collection, payload.clone(), state.stamp());
                state.records.insert(key, stamped);
                Ok(())
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        state.injected_push()?;

        let key = (collection.to_string(), id.to_string());
        let live = state.records.get(&key).is_some_and(Record::is_active);
        if live {
            let tombstone = Record::tombstone(id, collection, state.stamp());
            state.records.insert(key, tombstone);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.state.lock().gate()
    }
}
