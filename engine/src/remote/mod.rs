//! The remote side of synchronization.
//!
//! [`RemoteApi`] is the contract the sync engine talks to. [`HttpRemote`]
//! speaks it over HTTP; [`MemoryRemote`] keeps it in process for tests and
//! local demos.

mod http;
mod memory;

pub use http::{classify_status, HttpRemote};
pub use memory::{MemoryRemote, RemoteCall};

use crate::error::{ConflictError, Error, NetworkError, ValidationError};
use crate::{OperationKind, OutboxEntry, Record, Timestamp};
use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a failed remote call, before the engine attaches the entry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// Transient; retried with backoff
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The remote refused the operation, usually because its copy moved on.
    /// Carries the remote's current record when it sent one.
    #[error("rejected: {reason}")]
    Rejected {
        server_record: Option<Record>,
        reason: String,
    },

    /// The request itself is unacceptable to the remote
    #[error("invalid: {0}")]
    Invalid(String),
}

impl RemoteError {
    /// Attach the replayed entry and lift into the engine error taxonomy.
    pub fn into_error(self, entry: &OutboxEntry) -> Error {
        match self {
            RemoteError::Network(err) => Error::Network(err),
            RemoteError::Rejected {
                server_record,
                reason,
            } => Error::from(ConflictError {
                entry: entry.clone(),
                server_record,
                reason,
            }),
            RemoteError::Invalid(reason) => Error::Validation(ValidationError::Rejected {
                entry: Box::new(entry.clone()),
                reason,
            }),
        }
    }

    /// Lift a failed pull, which has no entry to blame.
    pub fn into_pull_error(self, collection: &str) -> Error {
        match self {
            RemoteError::Network(err) => Error::Network(err),
            RemoteError::Rejected { reason, .. } | RemoteError::Invalid(reason) => {
                Error::Validation(ValidationError::InvalidPayload(format!(
                    "pull of '{collection}' refused: {reason}"
                )))
            }
        }
    }
}

/// Remote contract for pulling deltas and replaying mutations.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Records changed strictly after `since` (everything when `None`).
    /// Deleted records come back as tombstones.
    async fn fetch_changes(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, RemoteError>;

    async fn create(&self, record: &Record) -> Result<(), RemoteError>;

    /// Replace the payload of an existing record.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Replay one outbox entry against the remote.
pub async fn replay(remote: &dyn RemoteApi, entry: &OutboxEntry) -> Result<(), RemoteError> {
    match entry.operation {
        OperationKind::Add => remote.create(&entry.to_record()).await,
        OperationKind::Update => {
            remote
                .update(&entry.collection, &entry.record_id, &entry.payload)
                .await
        }
        OperationKind::Delete => remote.delete(&entry.collection, &entry.record_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> OutboxEntry {
        OutboxEntry::new("orders", OperationKind::Update, "o1", json!({"total": 1}), 10)
    }

    #[test]
    fn rejection_becomes_conflict() {
        let server = Record::new("o1", "orders", json!({"total": 2}), 20);
        let err = RemoteError::Rejected {
            server_record: Some(server.clone()),
            reason: "stale".into(),
        }
        .into_error(&entry());

        match err {
            Error::Conflict(conflict) => {
                assert_eq!(conflict.server_record, Some(server));
                assert_eq!(conflict.entry.record_id, "o1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn invalid_becomes_validation_error() {
        let err = RemoteError::Invalid("bad payload".into()).into_error(&entry());
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Rejected { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_stays_retryable() {
        let err = RemoteError::from(NetworkError::Timeout).into_pull_error("orders");
        assert!(err.is_retryable());

        let err = RemoteError::Invalid("no such collection".into()).into_pull_error("orders");
        assert!(!err.is_retryable());
    }
}
