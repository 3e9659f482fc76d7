//! Mutation types: outbox entries and the local changes they mirror.
//!
//! Every mutation made while offline (or in queued write mode) becomes one
//! [`OutboxEntry`]. Entries are replayed against the remote strictly in
//! creation order per collection and removed only once acknowledged.

use crate::{CollectionName, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an outbox entry.
pub type EntryId = String;

/// The kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(OperationKind::Add),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation waiting for remote acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Entry id (idempotency key for enqueue/dequeue)
    pub id: EntryId,
    /// Target collection
    pub collection: CollectionName,
    /// Mutation kind
    pub operation: OperationKind,
    /// Target record
    pub record_id: RecordId,
    /// Full record payload for add/update, null for delete
    pub payload: serde_json::Value,
    /// When the mutation was made (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Insertion sequence assigned by the queue; defines replay order
    #[serde(default)]
    pub seq: u64,
}

impl OutboxEntry {
    /// Create a new entry with a fresh id.
    pub fn new(
        collection: impl Into<CollectionName>,
        operation: OperationKind,
        record_id: impl Into<RecordId>,
        payload: serde_json::Value,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            collection: collection.into(),
            operation,
            record_id: record_id.into(),
            payload,
            created_at,
            seq: 0,
        }
    }

    /// Replace the generated id (tests and replays use fixed ids).
    pub fn with_id(mut self, id: impl Into<EntryId>) -> Self {
        self.id = id.into();
        self
    }

    /// Replay order within a collection: enqueue order, whatever the clock
    /// said at the time.
    pub fn order_key(&self) -> u64 {
        self.seq
    }

    /// The record this entry would produce on the remote, for add/update.
    pub fn to_record(&self) -> Record {
        Record::new(
            self.record_id.clone(),
            self.collection.clone(),
            self.payload.clone(),
            self.created_at,
        )
    }

    /// Approximate number of bytes this entry occupies in storage.
    pub fn stored_size(&self) -> u64 {
        let payload_len = serde_json::to_vec(&self.payload)
            .map(|bytes| bytes.len())
            .unwrap_or_default();
        (self.id.len() + self.collection.len() + self.record_id.len() + payload_len) as u64
    }
}

/// A change to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    /// Insert or replace a record
    Put(Record),
    /// Remove a record
    Delete {
        collection: CollectionName,
        id: RecordId,
    },
}

impl LocalChange {
    pub fn collection(&self) -> &str {
        match self {
            LocalChange::Put(record) => &record.collection,
            LocalChange::Delete { collection, .. } => collection,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            LocalChange::Put(record) => &record.id,
            LocalChange::Delete { id, .. } => id,
        }
    }
}
