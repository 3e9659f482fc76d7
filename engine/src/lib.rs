//! # Ferry Engine
//!
//! Offline-first local persistence and synchronization.
//!
//! Applications read and write a local store that keeps working without a
//! network. Every mutation is recorded in a durable outbox in the same commit
//! as the local change, and a sync cycle later pulls remote deltas and
//! replays the outbox against the remote, oldest entry first.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an opaque JSON payload addressed by collection and id,
//! stamped with `updated_at`. The same shape travels over the wire; remote
//! deletions arrive as tombstones.
//!
//! ### Storage
//!
//! The [`store`] module defines the [`store::LocalStore`],
//! [`store::OutboxQueue`] and [`store::SyncStateTracker`] traits and two
//! backends: [`store::SqliteBackend`] (durable, `sqlx`) and
//! [`store::MemoryBackend`].
//!
//! ### Sync
//!
//! [`SyncEngine`] is the facade. [`SyncEngine::run_sync_cycle`] does, per
//! collection: pull changes since the watermark, merge them according to the
//! [`MergeStrategy`], push pending entries in order, and advance the
//! watermark only when both steps completed. Network failures are retried
//! with bounded backoff ([`RetryPolicy`]); rejections are reported as
//! [`SyncEvent::Conflict`] or [`SyncEvent::Rejected`] and keep the entry.
//! [`SyncScheduler`] runs cycles on an interval and on reconnect.
//!
//! ### Quota
//!
//! [`QuotaMonitor`] samples usage and evicts the oldest records of evictable
//! collections once usage crosses the threshold. Records with pending outbox
//! entries are never evicted.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{
//!     store::MemoryBackend, remote::MemoryRemote, CollectionSchema, EngineConfig,
//!     FieldDef, FieldType, OperationKind, Schema, SyncEngine, SyncStatus,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! // 1. Define a schema
//! let schema = Arc::new(Schema::new().with_collection(CollectionSchema::new(
//!     "orders",
//!     vec![FieldDef::required("total", FieldType::Float)],
//! )));
//!
//! // 2. Build an engine over a backend and a remote
//! let backend = Arc::new(MemoryBackend::new(schema.clone()));
//! let remote = Arc::new(MemoryRemote::new());
//! let engine = SyncEngine::new(backend, remote.clone(), schema, EngineConfig::default()).unwrap();
//!
//! // 3. Write locally; the change waits in the outbox
//! engine
//!     .write("orders", OperationKind::Add, "o1", json!({"total": 42.0}))
//!     .await
//!     .unwrap();
//! assert_eq!(engine.pending_count().await.unwrap(), 1);
//!
//! // 4. Sync
//! let report = engine.run_sync_cycle().await;
//! assert_eq!(report.status, SyncStatus::Success);
//! assert!(remote.record("orders", "o1").is_some());
//! # });
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod merge;
pub mod network;
pub mod operation;
pub mod quota;
pub mod record;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, WriteMode};
pub use error::{ConflictError, Error, NetworkError, Result, StorageError, ValidationError};
pub use merge::{MergeDecision, MergeStrategy, MergeTally};
pub use network::{NetworkObserver, NetworkStatus};
pub use operation::{EntryId, LocalChange, OperationKind, OutboxEntry};
pub use quota::{EvictionReport, QuotaConfig, QuotaMonitor};
pub use record::Record;
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use retry::RetryPolicy;
pub use schema::{CollectionSchema, FieldDef, FieldType, IndexDef, Schema};
pub use store::{Backend, IndexFilter, StorageQuota};
pub use sync::{
    CollectionReport, SyncEngine, SyncEvent, SyncReport, SyncScheduler, SyncStatus, WriteReceipt,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type Timestamp = u64;
