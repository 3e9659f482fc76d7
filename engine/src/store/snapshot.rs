//! Snapshots for exporting and restoring a backend's full state.
//!
//! A snapshot carries records, pending outbox entries and watermarks, so a
//! store can be moved between backends or restored after a restart of a
//! memory-only deployment.

use super::StorageResult;
use crate::error::{ConfigError, StorageError};
use crate::{CollectionName, OutboxEntry, Record, RecordId, Schema, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a store.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Records organized by collection, then by record id
    pub collections: BTreeMap<CollectionName, BTreeMap<RecordId, Record>>,
    /// Pending outbox entries in replay order
    pub outbox: Vec<OutboxEntry>,
    /// Watermark per collection
    pub sync_state: BTreeMap<CollectionName, Timestamp>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            collections: BTreeMap::new(),
            outbox: Vec::new(),
            sync_state: BTreeMap::new(),
        }
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, record: Record) {
        self.collections
            .entry(record.collection.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Get a record from the snapshot.
    pub fn get_record(&self, collection: &str, id: &str) -> Option<&Record> {
        self.collections.get(collection)?.get(id)
    }

    /// Count records across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Check that every collection in the snapshot is declared in `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<(), ConfigError> {
        let referenced = self
            .collections
            .keys()
            .chain(self.sync_state.keys())
            .chain(self.outbox.iter().map(|e| &e.collection));

        for name in referenced {
            if schema.get_collection(name).is_none() {
                return Err(ConfigError::InvalidSchema(format!(
                    "snapshot references undeclared collection '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string(self).map_err(|e| StorageError::Corrupt {
            table: "snapshot",
            reason: e.to_string(),
        })
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let snapshot: Self = serde_json::from_str(json).map_err(|e| StorageError::Corrupt {
            table: "snapshot",
            reason: e.to_string(),
        })?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::Corrupt {
                table: "snapshot",
                reason: format!(
                    "unsupported snapshot format version: {} (max supported: {})",
                    snapshot.format_version, SNAPSHOT_FORMAT_VERSION
                ),
            });
        }

        Ok(snapshot)
    }
}
