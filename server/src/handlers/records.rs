//! Record handlers: pull, create, update and delete.

use crate::db::{Applied, Mutation, RecordRepository};
use crate::error::{AppError, Result};
use ferry_engine::{Record, Timestamp};
use serde::Deserialize;

/// Query parameters for pull.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Highest `updatedAt` the client has seen; omitted on first sync
    pub since: Option<Timestamp>,
}

/// Body of an update.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub payload: serde_json::Value,
}

/// Outcome of a write, for picking the status code.
#[derive(Debug)]
pub enum WriteOutcome {
    Created(Record),
    Accepted(Option<Record>),
}

/// Records changed after `query.since`, oldest first.
pub async fn handle_pull(
    repo: &dyn RecordRepository,
    collection: &str,
    query: PullQuery,
) -> Result<Vec<Record>> {
    let records = repo.changes_since(collection, query.since).await?;
    tracing::debug!(collection, since = ?query.since, count = records.len(), "pull");
    Ok(records)
}

/// Create `record` in `collection`. Retrying the same create is accepted,
/// and a deleted id may be created again.
pub async fn handle_create(
    repo: &dyn RecordRepository,
    collection: &str,
    record: Record,
) -> Result<WriteOutcome> {
    if record.id.trim().is_empty() {
        return Err(AppError::BadRequest("record id must not be empty".into()));
    }
    if record.collection != collection {
        return Err(AppError::BadRequest(format!(
            "record belongs to '{}', not '{collection}'",
            record.collection
        )));
    }
    if !record.payload.is_object() {
        return Err(AppError::BadRequest("payload must be an object".into()));
    }

    match repo
        .apply(collection, &record.id, Mutation::Create(record.payload))
        .await?
    {
        Applied::Written(stored) => {
            tracing::info!(collection, id = %stored.id, updated_at = stored.updated_at, "created");
            Ok(WriteOutcome::Created(stored))
        }
        other => settle(collection, &record.id, other),
    }
}

/// Replace the payload of an existing record.
pub async fn handle_update(
    repo: &dyn RecordRepository,
    collection: &str,
    id: &str,
    request: UpdateRequest,
) -> Result<WriteOutcome> {
    if !request.payload.is_object() {
        return Err(AppError::BadRequest("payload must be an object".into()));
    }
    let applied = repo
        .apply(collection, id, Mutation::Update(request.payload))
        .await?;
    if let Applied::Written(stored) = &applied {
        tracing::info!(collection, id, updated_at = stored.updated_at, "updated");
    }
    settle(collection, id, applied)
}

/// Delete a record, leaving a tombstone. Deleting twice is fine.
pub async fn handle_delete(
    repo: &dyn RecordRepository,
    collection: &str,
    id: &str,
) -> Result<()> {
    let applied = repo.apply(collection, id, Mutation::Delete).await?;
    if let Applied::Written(stored) = &applied {
        tracing::info!(collection, id, updated_at = stored.updated_at, "deleted");
    }
    settle(collection, id, applied).map(|_| ())
}

fn settle(collection: &str, id: &str, applied: Applied) -> Result<WriteOutcome> {
    match applied {
        Applied::Written(stored) => Ok(WriteOutcome::Accepted(Some(stored))),
        Applied::Unchanged(current) => Ok(WriteOutcome::Accepted(current)),
        Applied::Conflict(current) => Err(AppError::Conflict(current)),
        Applied::Missing => Err(AppError::NotFound(format!("{collection}/{id}"))),
    }
}
