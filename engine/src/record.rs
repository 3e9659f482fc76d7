//! Record types for storing data.

use crate::{CollectionName, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// A data record in a collection.
///
/// The same shape travels over the wire: the remote answers pull requests with
/// arrays of records, where `deleted = true` marks a tombstone. Locally a
/// deleted record is removed from the store, so stored records are always live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identifier, unique within its collection and stable for its lifetime
    pub id: RecordId,
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// The actual data (opaque JSON object)
    pub payload: serde_json::Value,
    /// Last modification time in milliseconds since epoch.
    ///
    /// Local writes stamp the local clock; pulled records carry the remote's
    /// timestamp, which is what the sync watermark is built from.
    pub updated_at: Timestamp,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    /// Create a new live record.
    pub fn new(
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            payload,
            updated_at,
            deleted: false,
        }
    }

    /// Create a tombstone announcing the deletion of a record.
    pub fn tombstone(
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            payload: serde_json::Value::Null,
            updated_at,
            deleted: true,
        }
    }

    /// Generate a fresh record id.
    ///
    /// UUID v7 ids sort by creation time, and a locally generated id is kept
    /// as-is once the remote confirms the record.
    pub fn generate_id() -> RecordId {
        uuid::Uuid::now_v7().to_string()
    }

    /// Check if record is live (not a tombstone).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Resolve a dotted field path (`"owner.id"`) inside the payload.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.')
            .try_fold(&self.payload, |value, segment| value.get(segment))
    }

    /// Approximate number of bytes this record occupies in storage.
    pub fn stored_size(&self) -> u64 {
        let payload_len = serde_json::to_vec(&self.payload)
            .map(|bytes| bytes.len())
            .unwrap_or_default();
        (self.id.len() + self.collection.len() + payload_len) as u64
    }
}
