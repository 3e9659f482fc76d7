//! In-memory [`RecordRepository`] for tests and demos.

use super::{judge, stamped, Applied, Mutation, RecordRepository, Verdict};
use async_trait::async_trait;
use dashmap::DashMap;
use ferry_engine::{Record, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

type Key = (String, String);

/// Records in a [`DashMap`].
///
/// Writers and pulls share one lock so a pull never observes a newer stamp
/// while an older one is still being written.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: DashMap<Key, Record>,
    last_stamp: AtomicU64,
    gate: Mutex<()>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_stamp(&self) -> Timestamp {
        let wall = chrono::Utc::now().timestamp_millis().max(0) as Timestamp;
        let previous = self.last_stamp.load(Ordering::SeqCst);
        let stamp = wall.max(previous + 1);
        self.last_stamp.store(stamp, Ordering::SeqCst);
        stamp
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn changes_since(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, sqlx::Error> {
        let _gate = self.gate.lock().await;
        let mut changed: Vec<Record> = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                record.collection == collection && since.map_or(true, |s| record.updated_at > s)
            })
            .map(|entry| entry.value().clone())
            .collect();
        changed.sort_by_key(|r| r.updated_at);
        Ok(changed)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, sqlx::Error> {
        Ok(self
            .records
            .get(&(collection.to_string(), id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn apply(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> Result<Applied, sqlx::Error> {
        let _gate = self.gate.lock().await;
        let key = (collection.to_string(), id.to_string());
        let existing = self.records.get(&key).map(|entry| entry.value().clone());

        Ok(match (judge(existing.as_ref(), &mutation), existing) {
            (Verdict::Write(payload), _) => {
                let record = stamped(collection, id, payload, self.next_stamp());
                self.records.insert(key, record.clone());
                Applied::Written(record)
            }
            (Verdict::Unchanged, existing) => Applied::Unchanged(existing),
            (Verdict::Conflict, Some(current)) => Applied::Conflict(current),
            (Verdict::Conflict, None) | (Verdict::Missing, _) => Applied::Missing,
        })
    }
}
