//! Postgres-backed [`RecordRepository`].

use super::{judge, stamped, Applied, Mutation, Pool, RecordRepository, Verdict};
use async_trait::async_trait;
use ferry_engine::{Record, Timestamp};
use sqlx::{Postgres, Row, Transaction};

/// Advisory lock key serializing writers, so stamps commit in order.
const WRITE_LOCK: i64 = 0x6665_7272_79;

/// A stored record row from the database.
#[derive(Debug)]
struct StoredRecord {
    collection: String,
    record_id: String,
    payload: serde_json::Value,
    deleted: bool,
    updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            collection: row.try_get("collection")?,
            record_id: row.try_get("record_id")?,
            payload: row.try_get("payload")?,
            deleted: row.try_get("deleted")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    fn into_record(self) -> Record {
        Record {
            id: self.record_id,
            collection: self.collection,
            payload: self.payload,
            updated_at: self.updated_at.max(0) as Timestamp,
            deleted: self.deleted,
        }
    }
}

/// Records in the `records` table.
#[derive(Debug, Clone)]
pub struct PgRecordRepository {
    pool: Pool,
}

impl PgRecordRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn fetch_in(
        tx: &mut Transaction<'_, Postgres>,
        collection: &str,
        id: &str,
    ) -> Result<Option<Record>, sqlx::Error> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT collection, record_id, payload, deleted, updated_at
            FROM records
            WHERE collection = $1 AND record_id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(StoredRecord::into_record))
    }

    /// Next stamp: wall clock in milliseconds, bumped past the newest row.
    async fn next_stamp(tx: &mut Transaction<'_, Postgres>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT GREATEST(
                (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT,
                COALESCE(MAX(updated_at), 0) + 1
            )
            FROM records
            "#,
        )
        .fetch_one(&mut **tx)
        .await
    }

    async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        record: &Record,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO records (collection, record_id, payload, deleted, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (collection, record_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                deleted = EXCLUDED.deleted,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.collection)
        .bind(&record.id)
        .bind(&record.payload)
        .bind(record.deleted)
        .bind(record.updated_at as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn changes_since(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, sqlx::Error> {
        let since = since.map_or(-1, |s| s.min(i64::MAX as u64) as i64);
        let rows = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT collection, record_id, payload, deleted, updated_at
            FROM records
            WHERE collection = $1 AND updated_at > $2
            ORDER BY updated_at
            "#,
        )
        .bind(collection)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredRecord::into_record).collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, sqlx::Error> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT collection, record_id, payload, deleted, updated_at
            FROM records
            WHERE collection = $1 AND record_id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredRecord::into_record))
    }

    async fn apply(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation,
    ) -> Result<Applied, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WRITE_LOCK)
            .execute(&mut *tx)
            .await?;

        let existing = Self::fetch_in(&mut tx, collection, id).await?;
        let applied = match (judge(existing.as_ref(), &mutation), existing) {
            (Verdict::Write(payload), _) => {
                let stamp = Self::next_stamp(&mut tx).await?;
                let record = stamped(collection, id, payload, stamp as Timestamp);
                Self::upsert(&mut tx, &record).await?;
                Applied::Written(record)
            }
            (Verdict::Unchanged, existing) => Applied::Unchanged(existing),
            (Verdict::Conflict, Some(current)) => Applied::Conflict(current),
            (Verdict::Conflict, None) | (Verdict::Missing, _) => Applied::Missing,
        };

        tx.commit().await?;
        Ok(applied)
    }
}
