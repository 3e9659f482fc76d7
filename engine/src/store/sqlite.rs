//! Durable backend on `sqlx` SQLite.
//!
//! Payloads are stored as JSON text. Every declared secondary index becomes an
//! expression index over `json_extract(payload, '$.<field>')`, so index
//! filters run as plain SQL range scans.

use super::index::resolve_field;
use super::{
    Backend, IndexFilter, IndexQuery, LocalStore, OutboxQueue, StorageResult, SyncStateTracker,
};
use crate::error::{Result, StorageError};
use crate::{LocalChange, OperationKind, OutboxEntry, Record, RecordId, Schema, Timestamp};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// SQLite primary result code for "database or disk is full".
const SQLITE_FULL: &str = "13";
const PAGE_SIZE: u64 = 4096;

const RECORD_COLUMNS: &str = "collection, id, payload, updated_at";
const OUTBOX_COLUMNS: &str = "seq, id, collection, operation, record_id, payload, created_at";

/// Connection settings for [`SqliteBackend`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Pool size for file databases (in-memory databases always use one)
    pub max_connections: u32,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
    /// Hard cap on database pages; writes beyond it fail with `QuotaExceeded`
    pub max_page_count: Option<u32>,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            max_page_count: None,
        }
    }
}

/// Backend storing records, outbox and watermarks in one SQLite database.
pub struct SqliteBackend {
    pool: SqlitePool,
    schema: Arc<Schema>,
    page_quota: Option<u64>,
}

impl SqliteBackend {
    /// Open (creating if missing) the database at `url` with default options.
    ///
    /// `url` is a sqlx SQLite URL such as `sqlite://data/ferry.db` or
    /// `sqlite::memory:`.
    pub async fn connect(url: &str, schema: Arc<Schema>) -> Result<Self> {
        Self::connect_with(url, schema, SqliteOptions::default()).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory(schema: Arc<Schema>) -> Result<Self> {
        Self::connect("sqlite::memory:", schema).await
    }

    /// Open the database at `url`, run migrations and create index tables.
    pub async fn connect_with(
        url: &str,
        schema: Arc<Schema>,
        options: SqliteOptions,
    ) -> Result<Self> {
        schema.check()?;

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut connect = SqliteConnectOptions::from_str(url)
            .map_err(io_error)?
            .create_if_missing(true)
            .busy_timeout(options.busy_timeout);
        if !in_memory {
            connect = connect.journal_mode(SqliteJournalMode::Wal);
        }
        if let Some(pages) = options.max_page_count {
            connect = connect.pragma("max_page_count", pages.to_string());
        }

        // Every connection to :memory: is its own database, so keep exactly one
        // alive for the lifetime of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(options.max_connections.max(1))
        };
        let pool = pool_options.connect_with(connect).await.map_err(io_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Io(format!("migration failed: {e}")))?;

        let backend = Self {
            pool,
            schema,
            page_quota: options.max_page_count.map(|p| u64::from(p) * PAGE_SIZE),
        };
        backend.create_indexes().await?;

        tracing::debug!(url, in_memory, "sqlite store opened");
        Ok(backend)
    }

    async fn create_indexes(&self) -> StorageResult<()> {
        for collection in self.schema.collections.values() {
            for index in &collection.indexes {
                let sql = format!(
                    "CREATE INDEX IF NOT EXISTS \"idx_{}_{}\" ON records (collection, {})",
                    collection.name,
                    index.name,
                    index_expr(&index.field)
                );
                sqlx::query(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| self.classify(e))?;
            }
        }
        Ok(())
    }

    fn classify(&self, err: sqlx::Error) -> StorageError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(SQLITE_FULL) {
                let quota = self.page_quota.unwrap_or(0);
                return StorageError::QuotaExceeded { used: quota, quota };
            }
        }
        io_error(err)
    }
}

fn io_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolClosed => StorageError::Io("store is closed".into()),
        other => StorageError::Io(other.to_string()),
    }
}

/// SQL expression for an indexed payload field. Field paths are restricted to
/// dotted identifiers by [`Schema::check`], so inlining them is safe.
fn index_expr(field: &str) -> String {
    format!("json_extract(payload, '$.{field}')")
}

/// Bind a JSON value with the SQL type `json_extract` yields for it.
fn push_json_bind(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or(0.0));
            }
        },
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        other => {
            builder.push_bind(other.to_string());
        }
    }
}

fn record_from_row(row: &SqliteRow) -> StorageResult<Record> {
    let corrupt = |e: sqlx::Error| StorageError::Corrupt {
        table: "records",
        reason: e.to_string(),
    };
    let payload: String = row.try_get("payload").map_err(corrupt)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(corrupt)?;
    Ok(Record::new(
        row.try_get::<String, _>("id").map_err(corrupt)?,
        row.try_get::<String, _>("collection").map_err(corrupt)?,
        serde_json::from_str(&payload).map_err(|e| StorageError::Corrupt {
            table: "records",
            reason: e.to_string(),
        })?,
        updated_at.max(0) as Timestamp,
    ))
}

fn entry_from_row(row: &SqliteRow) -> StorageResult<OutboxEntry> {
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "outbox",
        reason,
    };
    let get_text = |column: &str| -> StorageResult<String> {
        row.try_get(column).map_err(|e| corrupt(e.to_string()))
    };

    let operation = get_text("operation")?;
    let operation = OperationKind::parse(&operation)
        .ok_or_else(|| corrupt(format!("unknown operation '{operation}'")))?;
    let payload = serde_json::from_str(&get_text("payload")?).map_err(|e| corrupt(e.to_string()))?;
    let created_at: i64 = row.try_get("created_at").map_err(|e| corrupt(e.to_string()))?;
    let seq: i64 = row.try_get("seq").map_err(|e| corrupt(e.to_string()))?;

    Ok(OutboxEntry {
        id: get_text("id")?,
        collection: get_text("collection")?,
        operation,
        record_id: get_text("record_id")?,
        payload,
        created_at: created_at.max(0) as Timestamp,
        seq: seq.max(0) as u64,
    })
}

async fn upsert_record<'e, E>(exec: E, record: &Record) -> std::result::Result<SqliteQueryResult, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO records (collection, id, payload, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (collection, id) DO UPDATE SET
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.collection)
    .bind(&record.id)
    .bind(record.payload.to_string())
    .bind(record.updated_at as i64)
    .execute(exec)
    .await
}

async fn delete_record<'e, E>(exec: E, collection: &str, id: &str) -> std::result::Result<SqliteQueryResult, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
        .bind(collection)
        .bind(id)
        .execute(exec)
        .await
}

async fn insert_entry<'e, E>(exec: E, entry: &OutboxEntry) -> std::result::Result<SqliteQueryResult, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO outbox (id, collection, operation, record_id, payload, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.collection)
    .bind(entry.operation.as_str())
    .bind(&entry.record_id)
    .bind(entry.payload.to_string())
    .bind(entry.created_at as i64)
    .execute(exec)
    .await
}

#[async_trait]
impl LocalStore for SqliteBackend {
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?");
        let row = sqlx::query(&sql)
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_all(
        &self,
        collection: &str,
        filter: Option<&IndexFilter>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Record>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = "
        ));
        builder.push_bind(collection.to_string());

        match filter {
            Some(filter) => {
                let expr = index_expr(resolve_field(&self.schema, collection, filter)?);
                match &filter.query {
                    IndexQuery::Eq { value } => {
                        if value.is_null() {
                            return Ok(Vec::new());
                        }
                        builder.push(format!(" AND {expr} = "));
                        push_json_bind(&mut builder, value);
                    }
                    IndexQuery::Range { lower, upper } => {
                        builder.push(format!(" AND {expr} IS NOT NULL"));
                        if let Some(lower) = lower {
                            builder.push(format!(" AND {expr} >= "));
                            push_json_bind(&mut builder, lower);
                        }
                        if let Some(upper) = upper {
                            builder.push(format!(" AND {expr} <= "));
                            push_json_bind(&mut builder, upper);
                        }
                    }
                }
                builder.push(format!(" ORDER BY {expr}, id"));
            }
            None => {
                builder.push(" ORDER BY id");
            }
        }

        if let Some(limit) = limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn put(&self, record: &Record) -> StorageResult<()> {
        upsert_record(&self.pool, record)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        let result = delete_record(&self.pool, collection, key)
            .await
            .map_err(|e| self.classify(e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(collection, key));
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn scan_oldest(&self, collection: &str, limit: usize) -> StorageResult<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? ORDER BY updated_at, id LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(collection)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self, collection: &str) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl OutboxQueue for SqliteBackend {
    async fn enqueue(&self, entry: &OutboxEntry) -> StorageResult<()> {
        insert_entry(&self.pool, entry)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn peek_oldest(&self, collection: &str) -> StorageResult<Option<OutboxEntry>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE collection = ? ORDER BY seq LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(collection)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn dequeue(&self, entry_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM outbox WHERE id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn list_pending(&self, collection: &str) -> StorageResult<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE collection = ? ORDER BY seq"
        );
        let rows = sqlx::query(&sql)
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn pending_count(&self) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(count.max(0) as usize)
    }

    async fn pending_record_ids(&self, collection: &str) -> StorageResult<HashSet<RecordId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT record_id FROM outbox WHERE collection = ?")
                .bind(collection)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| self.classify(e))?;
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl SyncStateTracker for SqliteBackend {
    async fn get_last_synced(&self, collection: &str) -> StorageResult<Option<Timestamp>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_synced_at FROM sync_state WHERE collection = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.classify(e))?;
        Ok(value.map(|ts| ts.max(0) as Timestamp))
    }

    async fn set_last_synced(&self, collection: &str, timestamp: Timestamp) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (collection, last_synced_at)
            VALUES (?, ?)
            ON CONFLICT (collection) DO UPDATE SET
                last_synced_at = MAX(last_synced_at, excluded.last_synced_at)
            "#,
        )
        .bind(collection)
        .bind(timestamp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify(e))?;
        Ok(())
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn commit(
        &self,
        change: &LocalChange,
        entry: Option<&OutboxEntry>,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;

        match change {
            LocalChange::Put(record) => {
                upsert_record(&mut *tx, record)
                    .await
                    .map_err(|e| self.classify(e))?;
            }
            LocalChange::Delete { collection, id } => {
                let result = delete_record(&mut *tx, collection, id)
                    .await
                    .map_err(|e| self.classify(e))?;
                if result.rows_affected() == 0 {
                    return Err(StorageError::not_found(collection.as_str(), id.as_str()));
                }
            }
        }
        if let Some(entry) = entry {
            insert_entry(&mut *tx, entry)
                .await
                .map_err(|e| self.classify(e))?;
        }

        tx.commit().await.map_err(|e| self.classify(e))
    }

    async fn evict_unreferenced(&self, collection: &str, id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM records
            WHERE collection = ?1 AND id = ?2
              AND NOT EXISTS (
                  SELECT 1 FROM outbox WHERE collection = ?1 AND record_id = ?2
              )
            "#,
        )
        .bind(collection)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn used_bytes(&self) -> StorageResult<u64> {
        let used: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COALESCE(SUM(
                    LENGTH(CAST(id AS BLOB)) + LENGTH(CAST(collection AS BLOB))
                    + LENGTH(CAST(payload AS BLOB))), 0) FROM records)
              + (SELECT COALESCE(SUM(
                    LENGTH(CAST(id AS BLOB)) + LENGTH(CAST(collection AS BLOB))
                    + LENGTH(CAST(record_id AS BLOB)) + LENGTH(CAST(payload AS BLOB))), 0) FROM outbox)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.classify(e))?;
        Ok(used.max(0) as u64)
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        tracing::debug!("sqlite store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollectionSchema;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_collection(
                    CollectionSchema::new("orders", vec![])
                        .with_index("byStatus", "status")
                        .with_index("byTotal", "total"),
                )
                .with_collection(
                    CollectionSchema::new("messages", vec![]).with_index("bySender", "sender.id"),
                ),
        )
    }

    fn order(id: &str, status: &str, total: i64, updated_at: u64) -> Record {
        Record::new(
            id,
            "orders",
            json!({"status": status, "total": total}),
            updated_at,
        )
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        let record = order("o1", "open", 10, 1);
        store.put(&record).await.unwrap();

        assert_eq!(store.get("orders", "o1").await.unwrap(), Some(record));
        assert_eq!(store.count("orders").await.unwrap(), 1);

        store.delete("orders", "o1").await.unwrap();
        assert_eq!(store.get("orders", "o1").await.unwrap(), None);
        assert!(matches!(
            store.delete("orders", "o1").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn index_filters() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store.put(&order("o1", "open", 30, 1)).await.unwrap();
        store.put(&order("o2", "closed", 10, 2)).await.unwrap();
        store.put(&order("o3", "open", 20, 3)).await.unwrap();

        let open = store
            .get_all("orders", Some(&IndexFilter::eq("byStatus", "open")), None)
            .await
            .unwrap();
        let ids: Vec<_> = open.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o3"]);

        let mid = store
            .get_all(
                "orders",
                Some(&IndexFilter::range("byTotal", Some(json!(15)), None)),
                None,
            )
            .await
            .unwrap();
        let ids: Vec<_> = mid.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o1"]);

        let err = store
            .get_all("orders", Some(&IndexFilter::eq("byOwner", "u1")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownIndex { .. }));
    }

    #[tokio::test]
    async fn nested_index_field() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store
            .put(&Record::new("m1", "messages", json!({"sender": {"id": "u1"}}), 1))
            .await
            .unwrap();
        store
            .put(&Record::new("m2", "messages", json!({"sender": {"id": "u2"}}), 2))
            .await
            .unwrap();

        let from_u2 = store
            .get_all("messages", Some(&IndexFilter::eq("bySender", "u2")), None)
            .await
            .unwrap();
        assert_eq!(from_u2.len(), 1);
        assert_eq!(from_u2[0].id, "m2");
    }

    #[tokio::test]
    async fn scan_oldest_orders_by_updated_at() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store.put(&order("a", "open", 1, 30)).await.unwrap();
        store.put(&order("b", "open", 1, 10)).await.unwrap();
        store.put(&order("c", "open", 1, 20)).await.unwrap();

        let oldest = store.scan_oldest("orders", 2).await.unwrap();
        let ids: Vec<_> = oldest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn outbox_order_and_idempotence() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        let entry = |id: &str, at: u64| {
            OutboxEntry::new("orders", OperationKind::Update, "o1", json!({"n": 1}), at).with_id(id)
        };
        store.enqueue(&entry("late", 20)).await.unwrap();
        store.enqueue(&entry("early", 10)).await.unwrap();
        store.enqueue(&entry("tie", 20)).await.unwrap();
        store.enqueue(&entry("early", 10)).await.unwrap();

        let pending = store.list_pending("orders").await.unwrap();
        let ids: Vec<_> = pending.iter().map(|e| e.id.as_str()).collect();
        // enqueue order, not created_at
        assert_eq!(ids, vec!["late", "early", "tie"]);
        assert_eq!(pending[0].payload, json!({"n": 1}));
        assert_eq!(pending[0].operation, OperationKind::Update);

        store.dequeue("early").await.unwrap();
        store.dequeue("early").await.unwrap();
        assert_eq!(store.peek_oldest("orders").await.unwrap().unwrap().id, "late");
        assert_eq!(store.pending_count().await.unwrap(), 2);
        assert_eq!(
            store.pending_record_ids("orders").await.unwrap(),
            HashSet::from(["o1".to_string()])
        );
    }

    #[tokio::test]
    async fn evict_unreferenced_checks_the_outbox_in_the_same_statement() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store.put(&order("o1", "open", 1, 10)).await.unwrap();
        store.put(&order("o2", "open", 1, 20)).await.unwrap();
        store
            .enqueue(&OutboxEntry::new("orders", OperationKind::Update, "o1", json!({}), 30))
            .await
            .unwrap();

        assert!(!store.evict_unreferenced("orders", "o1").await.unwrap());
        assert!(store.evict_unreferenced("orders", "o2").await.unwrap());
        assert!(!store.evict_unreferenced("orders", "ghost").await.unwrap());
        assert_eq!(store.count("orders").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn watermark_is_monotonic() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store.set_last_synced("orders", 100).await.unwrap();
        store.set_last_synced("orders", 40).await.unwrap();
        assert_eq!(store.get_last_synced("orders").await.unwrap(), Some(100));
        assert_eq!(store.get_last_synced("messages").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_is_atomic() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        let missing = LocalChange::Delete {
            collection: "orders".into(),
            id: "ghost".into(),
        };
        let entry = OutboxEntry::new("orders", OperationKind::Delete, "ghost", Value::Null, 1);
        let err = store.commit(&missing, Some(&entry)).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn used_bytes_matches_logical_size() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        let record = order("o1", "open", 10, 1);
        let entry = OutboxEntry::new("orders", OperationKind::Add, "o1", record.payload.clone(), 1);
        store
            .commit(&LocalChange::Put(record.clone()), Some(&entry))
            .await
            .unwrap();

        assert_eq!(
            store.used_bytes().await.unwrap(),
            record.stored_size() + entry.stored_size()
        );
    }

    #[tokio::test]
    async fn closed_store_fails() {
        let store = SqliteBackend::in_memory(schema()).await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.get("orders", "o1").await,
            Err(StorageError::Io(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_index_paths() {
        let schema = Schema::new().with_collection(
            CollectionSchema::new("orders", vec![]).with_index("bad", "x') OR 1=1 --"),
        );
        assert!(SqliteBackend::in_memory(Arc::new(schema)).await.is_err());
    }
}
