//! Record persistence for the reference remote.
//!
//! Both repositories apply the same acceptance rules ([`judge`]) and hand out
//! strictly increasing `updated_at` stamps, so a client that pulls with
//! `since = <last seen stamp>` never misses a change.

mod memory;
mod pool;
mod postgres;

pub use memory::MemoryRepository;
pub use pool::*;
pub use postgres::PgRecordRepository;

use async_trait::async_trait;
use ferry_engine::{Record, Timestamp};
use serde_json::Value;

/// A client mutation as received over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Value),
    Update(Value),
    Delete,
}

/// What a repository did with a [`Mutation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// A new version was stored
    Written(Record),
    /// Nothing to do: a retried create or a repeated delete
    Unchanged(Option<Record>),
    /// Refused; carries the current stored record
    Conflict(Record),
    /// Update of a record that was never created
    Missing,
}

/// Decision of [`judge`], before a stamp is assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Store this payload (`None` stores a tombstone)
    Write(Option<Value>),
    Unchanged,
    Conflict,
    Missing,
}

/// Acceptance rules shared by every repository.
pub fn judge(existing: Option<&Record>, mutation: &Mutation) -> Verdict {
    match (mutation, existing) {
        (Mutation::Create(payload), None) => Verdict::Write(Some(payload.clone())),
        // a create over a tombstone brings the id back with a fresh stamp
        (Mutation::Create(payload), Some(current)) if !current.is_active() => {
            Verdict::Write(Some(payload.clone()))
        }
        (Mutation::Create(payload), Some(current)) => {
            if current.payload == *payload {
                Verdict::Unchanged
            } else {
                Verdict::Conflict
            }
        }
        (Mutation::Update(_), None) => Verdict::Missing,
        (Mutation::Update(_), Some(current)) if !current.is_active() => Verdict::Conflict,
        (Mutation::Update(payload), Some(_)) => Verdict::Write(Some(payload.clone())),
        (Mutation::Delete, Some(current)) if current.is_active() => Verdict::Write(None),
        (Mutation::Delete, _) => Verdict::Unchanged,
    }
}

/// Storage behind the HTTP handlers.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Records of `collection` stamped strictly after `since`, oldest first.
    async fn changes_since(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, sqlx::Error>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, sqlx::Error>;

    /// Judge and, if accepted, store `mutation` atomically.
    async fn apply(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> Result<Applied, sqlx::Error>;
}

/// Turn a verdict into a stored record with the given stamp.
pub(crate) fn stamped(collection: &str, id: &str, payload: Option<Value>, stamp: Timestamp) -> Record {
    match payload {
        Some(payload) => Record::new(id, collection, payload, stamp),
        None => Record::tombstone(id, collection, stamp),
    }
}
