//! Local persistence: record store, outbox queue and sync watermarks.
//!
//! The engine depends only on the traits in this module. Two backends ship
//! with the crate:
//!
//! - [`MemoryBackend`]: in-process maps, optional hard capacity, snapshot
//!   export/import. Suited to tests and ephemeral caches.
//! - [`SqliteBackend`]: durable storage on `sqlx` SQLite with WAL journaling.
//!
//! Every call is atomic on its own. There are no cross-collection
//! transactions, except [`Backend::commit`], which writes a local change and
//! its outbox entry together so a successful write is never half-recorded.

mod index;
mod memory;
mod snapshot;
mod sqlite;

pub use index::{compare_values, IndexFilter, IndexQuery};
pub use memory::MemoryBackend;
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use sqlite::{SqliteBackend, SqliteOptions};

use crate::error::StorageError;
use crate::{LocalChange, OutboxEntry, Record, RecordId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result type for storage calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keyed, indexed record storage per collection.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch one record.
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Record>>;

    /// Fetch records, optionally filtered through a declared index.
    ///
    /// Filtered results are ordered by the indexed value, unfiltered results
    /// by id.
    async fn get_all(
        &self,
        collection: &str,
        filter: Option<&IndexFilter>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>>;

    /// Insert or replace a record.
    async fn put(&self, record: &Record) -> StorageResult<()>;

    /// Remove a record. Fails with [`StorageError::NotFound`] if absent.
    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()>;

    /// Remove every record of a collection.
    async fn clear(&self, collection: &str) -> StorageResult<()>;

    /// Oldest records first, by `updated_at`.
    async fn scan_oldest(&self, collection: &str, limit: usize) -> StorageResult<Vec<Record>>;

    /// Number of records in a collection.
    async fn count(&self, collection: &str) -> StorageResult<usize>;
}

/// Durable FIFO of pending remote mutations.
#[async_trait]
pub trait OutboxQueue: Send + Sync {
    /// Append an entry. A second enqueue of the same id is a no-op.
    async fn enqueue(&self, entry: &OutboxEntry) -> StorageResult<()>;

    /// The next entry to replay for a collection.
    async fn peek_oldest(&self, collection: &str) -> StorageResult<Option<OutboxEntry>>;

    /// Remove an acknowledged entry. A missing id is a no-op.
    async fn dequeue(&self, entry_id: &str) -> StorageResult<()>;

    /// All pending entries of a collection, oldest first.
    async fn list_pending(&self, collection: &str) -> StorageResult<Vec<OutboxEntry>>;

    /// Pending entries across all collections.
    async fn pending_count(&self) -> StorageResult<usize>;

    /// Ids of records targeted by pending entries of a collection.
    async fn pending_record_ids(&self, collection: &str) -> StorageResult<HashSet<RecordId>>;
}

/// Per-collection "last synchronized" watermarks.
#[async_trait]
pub trait SyncStateTracker: Send + Sync {
    async fn get_last_synced(&self, collection: &str) -> StorageResult<Option<Timestamp>>;

    /// Store a watermark. Values older than the stored one are ignored, so the
    /// watermark never moves backwards.
    async fn set_last_synced(&self, collection: &str, timestamp: Timestamp) -> StorageResult<()>;
}

/// A complete storage backend.
#[async_trait]
pub trait Backend: LocalStore + OutboxQueue + SyncStateTracker {
    /// Apply a local change and, if given, enqueue its outbox entry as one
    /// durable step.
    async fn commit(&self, change: &LocalChange, entry: Option<&OutboxEntry>)
        -> StorageResult<()>;

    /// Remove a record unless a pending entry targets it, checked and applied
    /// as one step. Returns whether the record was removed; a missing record
    /// gives `false`.
    async fn evict_unreferenced(&self, collection: &str, id: &str) -> StorageResult<bool>;

    /// Logical bytes in use (record ids, payloads, outbox entries).
    async fn used_bytes(&self) -> StorageResult<u64>;

    /// Flush and release resources. Further calls fail.
    async fn close(&self) -> StorageResult<()>;
}

/// Storage usage sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageQuota {
    /// Fraction of the quota in use (`0.0` when no quota is configured).
    pub fn usage_ratio(&self) -> f64 {
        if self.quota_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.quota_bytes as f64
        }
    }
}
