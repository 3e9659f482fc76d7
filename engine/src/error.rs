//! Error types for the Ferry engine.
//!
//! Errors are grouped by how the engine reacts to them:
//!
//! - [`ValidationError`] goes straight back to the caller and is never retried.
//! - [`NetworkError`] is retried with bounded backoff inside the sync engine.
//! - [`StorageError::QuotaExceeded`] triggers one eviction pass and one retry.
//! - [`ConflictError`] is surfaced with both sides so the application can decide.

use crate::{CollectionName, OutboxEntry, Record, RecordId};
use thiserror::Error;

/// Failures of the local store, outbox or sync state tables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("record not found: {collection}/{id}")]
    NotFound {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("storage io failure: {0}")]
    Io(String),

    #[error("storage quota exceeded: {used} of {quota} bytes in use")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("index '{index}' is not declared on collection '{collection}'")]
    UnknownIndex {
        collection: CollectionName,
        index: String,
    },

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl StorageError {
    pub fn not_found(collection: impl Into<CollectionName>, id: impl Into<RecordId>) -> Self {
        StorageError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Failures talking to the remote.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request timed out")]
    Timeout,

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("client is offline")]
    Offline,

    #[error("remote answered with status {0}")]
    Server(u16),
}

/// The remote rejected a replayed operation.
///
/// Carries the rejected local entry and the server's current record (when the
/// remote returned one) so the application can resolve it.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("remote rejected {} on {}/{}: {reason}", entry.operation, entry.collection, entry.record_id)]
pub struct ConflictError {
    pub entry: OutboxEntry,
    pub server_record: Option<Record>,
    pub reason: String,
}

/// Malformed or inadmissible input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("collection not declared: {0}")]
    UnknownCollection(CollectionName),

    #[error("record id must not be empty")]
    EmptyId,

    #[error("record already exists: {collection}/{id}")]
    AlreadyExists {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("remote refused {} on {}/{}: {reason}", entry.operation, entry.collection, entry.record_id)]
    Rejected {
        entry: Box<OutboxEntry>,
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Conflict(#[from] Box<ConflictError>),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ConflictError> for Error {
    fn from(err: ConflictError) -> Self {
        Error::Conflict(Box::new(err))
    }
}

impl Error {
    /// Whether the sync engine should retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
