//! End-to-end sync scenarios against the in-memory backend and remote.

mod common;

use common::{fast_config, fixture, fixture_with, Fixture};
use ferry_engine::remote::{MemoryRemote, RemoteCall};
use ferry_engine::store::{Backend, LocalStore, MemoryBackend, OutboxQueue, SyncStateTracker};
use ferry_engine::{
    CollectionSchema, EngineConfig, LocalChange, MergeStrategy, NetworkError, NetworkStatus,
    OperationKind, OutboxEntry, QuotaConfig, Record, RetryPolicy, Schema, SyncEngine, SyncEvent,
    SyncStatus, WriteMode,
};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Offline writes
// ============================================================================

#[tokio::test]
async fn offline_add_is_delivered_after_reconnect() {
    let Fixture {
        engine, remote, ..
    } = fixture(fast_config());
    engine.network().set_status(NetworkStatus::Offline);

    engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 42}))
        .await
        .unwrap();
    let pending = engine.pending("orders").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record_id, "o1");

    let report = engine.run_sync_cycle().await;
    assert_eq!(report.status, SyncStatus::Error);
    assert_eq!(engine.pending_count().await.unwrap(), 1);

    engine.network().set_status(NetworkStatus::Online);
    let report = engine.run_sync_cycle().await;
    assert_eq!(report.status, SyncStatus::Success);
    assert_eq!(engine.pending_count().await.unwrap(), 0);

    let local = engine.get("orders", "o1").await.unwrap().unwrap();
    assert_eq!(local.payload, json!({"total": 42}));
    assert_eq!(
        remote.record("orders", "o1").unwrap().payload,
        json!({"total": 42})
    );
}

#[tokio::test]
async fn sequential_updates_replay_in_order() {
    let f = fixture(fast_config());
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    f.engine.run_sync_cycle().await;

    f.engine.network().set_status(NetworkStatus::Offline);
    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 1, "a": 1}))
        .await
        .unwrap();
    f.clock.advance(1);
    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 2, "b": 2}))
        .await
        .unwrap();
    f.engine.network().set_status(NetworkStatus::Online);

    let report = f.engine.run_sync_cycle().await;
    assert_eq!(report.collection("orders").unwrap().pushed, 2);

    // whole-payload replacement, not a field merge
    assert_eq!(
        f.remote.record("orders", "o1").unwrap().payload,
        json!({"total": 2, "b": 2})
    );
    let updates: Vec<_> = f
        .remote
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RemoteCall::Update { .. }))
        .collect();
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn same_timestamp_entries_keep_enqueue_order() {
    let f = fixture(fast_config());
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 2}))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Delete, "o1", json!(null))
        .await
        .unwrap();

    let ops: Vec<_> = f
        .engine
        .pending("orders")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert_eq!(
        ops,
        vec![
            OperationKind::Add,
            OperationKind::Update,
            OperationKind::Delete
        ]
    );

    f.engine.run_sync_cycle().await;
    assert!(f.remote.record("orders", "o1").unwrap().deleted);
    assert!(f.engine.get("orders", "o1").await.unwrap().is_none());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn exhausted_push_retries_keep_the_entry() {
    let schema = Arc::new(Schema::new().with_collection(CollectionSchema::new("orders", vec![])));
    let backend = Arc::new(MemoryBackend::new(schema.clone()));
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(backend.clone(), remote.clone(), schema, fast_config()).unwrap();

    engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 42}))
        .await
        .unwrap();
    remote.fail_pushes(3, NetworkError::Unreachable("connection reset".into()).into());

    let report = engine.run_sync_cycle().await;
    assert_eq!(report.status, SyncStatus::Error);
    assert_eq!(remote.push_count(), 3);
    assert_eq!(backend.pending_count().await.unwrap(), 1);
    assert!(backend.get("orders", "o1").await.unwrap().is_some());
    assert!(remote.record("orders", "o1").is_none());

    // failures were consumed; the next cycle delivers
    let report = engine.run_sync_cycle().await;
    assert_eq!(report.status, SyncStatus::Success);
    assert!(remote.record("orders", "o1").is_some());
}

#[tokio::test]
async fn failed_entry_blocks_later_entries_of_its_collection() {
    let f = fixture(fast_config());
    for (id, total) in [("o1", 1), ("o2", 2)] {
        f.engine
            .write("orders", OperationKind::Add, id, json!({"total": total}))
            .await
            .unwrap();
    }
    f.engine.run_sync_cycle().await;

    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 3}))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Update, "o2", json!({"total": 4}))
        .await
        .unwrap();
    f.remote.fail_pushes(3, NetworkError::Timeout.into());

    let report = f.engine.run_sync_cycle().await;
    let orders = report.collection("orders").unwrap();
    assert_eq!(orders.pushed, 0);
    assert_eq!(orders.remaining, 2);
    assert_eq!(report.status, SyncStatus::Partial);
    // o2 was never attempted
    assert_eq!(
        f.remote.record("orders", "o2").unwrap().payload,
        json!({"total": 2})
    );
}

#[tokio::test]
async fn validation_rejection_is_reported_and_kept() {
    let f = fixture(fast_config());
    let mut events = f.engine.subscribe();
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    f.remote.fail_pushes(
        1,
        ferry_engine::RemoteError::Invalid("total must be positive".into()),
    );

    let report = f.engine.run_sync_cycle().await;
    assert_eq!(report.collection("orders").unwrap().remaining, 1);
    assert_eq!(f.remote.push_count(), 1);

    let rejected = loop {
        if let SyncEvent::Rejected(err) = events.recv().await.unwrap() {
            break err;
        }
    };
    assert!(rejected.to_string().contains("total must be positive"));

    let entry = f.engine.pending("orders").await.unwrap().remove(0);
    f.engine.discard_entry(&entry.id).await.unwrap();
    assert_eq!(f.engine.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn update_of_remotely_deleted_record_conflicts() {
    let f = fixture(fast_config());
    let mut events = f.engine.subscribe();
    f.remote.upsert("orders", "o1", json!({"total": 1}));
    f.engine.run_sync_cycle().await;

    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 5}))
        .await
        .unwrap();
    f.remote.remove("orders", "o1");

    f.engine.run_sync_cycle().await;
    let conflict = loop {
        if let SyncEvent::Conflict(conflict) = events.recv().await.unwrap() {
            break conflict;
        }
    };
    assert_eq!(conflict.entry.operation, OperationKind::Update);
    assert!(conflict.server_record.as_ref().unwrap().deleted);
    // preserve-local kept the local edit through the pull
    assert!(f.engine.get("orders", "o1").await.unwrap().is_some());

    f.engine.adopt_server_record(&conflict).await.unwrap();
    assert!(f.engine.get("orders", "o1").await.unwrap().is_none());
    assert_eq!(f.engine.pending_count().await.unwrap(), 0);
}

// ============================================================================
// Merge strategies
// ============================================================================

#[tokio::test]
async fn remote_wins_overwrites_pending_local_copy() {
    let f = fixture(EngineConfig {
        merge_strategy: MergeStrategy::RemoteWins,
        ..fast_config()
    });
    f.remote.upsert("orders", "o1", json!({"total": 1}));
    f.engine.run_sync_cycle().await;

    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 10}))
        .await
        .unwrap();
    f.remote.upsert("orders", "o1", json!({"total": 20}));
    f.remote.fail_pushes(3, NetworkError::Timeout.into());

    f.engine.run_sync_cycle().await;
    assert_eq!(
        f.engine.get("orders", "o1").await.unwrap().unwrap().payload,
        json!({"total": 20})
    );
    // the local entry is still replayed later
    assert_eq!(f.engine.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn collection_override_beats_engine_default() {
    let schema = Arc::new(
        Schema::new().with_collection(
            CollectionSchema::new("orders", vec![]).with_merge_strategy(MergeStrategy::RemoteWins),
        ),
    );
    let backend = Arc::new(MemoryBackend::new(schema.clone()));
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(backend.clone(), remote.clone(), schema, fast_config()).unwrap();

    let local = Record::new("o1", "orders", json!({"total": 1}), 5);
    backend
        .commit(
            &LocalChange::Put(local),
            Some(&OutboxEntry::new("orders", OperationKind::Update, "o1", json!({"total": 1}), 5)),
        )
        .await
        .unwrap();
    remote.upsert("orders", "o1", json!({"total": 9}));
    remote.fail_pushes(3, NetworkError::Timeout.into());

    let report = engine.run_sync_cycle().await;
    assert_eq!(report.collection("orders").unwrap().merge.applied, 1);
    assert_eq!(
        backend.get("orders", "o1").await.unwrap().unwrap().payload,
        json!({"total": 9})
    );
}

// ============================================================================
// Watermarks
// ============================================================================

#[tokio::test]
async fn watermark_only_advances_when_drained() {
    let f = fixture(fast_config());
    f.remote.upsert("orders", "r1", json!({"total": 1}));
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 2}))
        .await
        .unwrap();
    f.remote.fail_pushes(3, NetworkError::Timeout.into());

    f.engine.run_sync_cycle().await;
    assert_eq!(f.backend.get_last_synced("orders").await.unwrap(), None);

    f.engine.run_sync_cycle().await;
    let mark = f.backend.get_last_synced("orders").await.unwrap();
    assert_eq!(mark, Some(f.remote.record("orders", "r1").unwrap().updated_at));

    // the next pull asks only for what came after
    f.engine.run_sync_cycle().await;
    let last_fetch = f
        .remote
        .calls()
        .into_iter()
        .rev()
        .find(|c| matches!(c, RemoteCall::Fetch { collection, .. } if collection == "orders"));
    assert!(matches!(
        last_fetch,
        Some(RemoteCall::Fetch { since: Some(_), .. })
    ));
}

#[tokio::test]
async fn empty_pull_keeps_previous_watermark() {
    let f = fixture(fast_config());
    f.remote.upsert("products", "p1", json!({}));
    f.engine.run_sync_cycle().await;
    let first = f.backend.get_last_synced("products").await.unwrap();
    assert!(first.is_some());

    f.engine.run_sync_cycle().await;
    assert_eq!(f.backend.get_last_synced("products").await.unwrap(), first);
}

// ============================================================================
// Immediate mode
// ============================================================================

#[tokio::test]
async fn immediate_mode_queues_behind_pending_entries() {
    let f = fixture(EngineConfig {
        write_mode: WriteMode::Immediate,
        ..fast_config()
    });
    f.engine.network().set_status(NetworkStatus::Offline);
    let first = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    assert!(first.is_queued());

    f.engine.network().set_status(NetworkStatus::Online);
    let second = f
        .engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 2}))
        .await
        .unwrap();
    assert!(second.is_queued());
    assert_eq!(f.remote.push_count(), 0);

    // other collections have nothing waiting and go straight out
    let third = f
        .engine
        .write("messages", OperationKind::Add, "m1", json!({"text": "hey"}))
        .await
        .unwrap();
    assert!(third.delivered);
}

// ============================================================================
// Quota
// ============================================================================

#[tokio::test]
async fn eviction_prefers_messages_and_spares_pending() {
    let f = fixture(EngineConfig {
        quota: QuotaConfig {
            quota_bytes: 2_000,
            batch_size: 4,
            ..QuotaConfig::default()
        },
        ..fast_config()
    });
    let mut events = f.engine.subscribe();
    f.engine.network().set_status(NetworkStatus::Offline);

    for i in 0..10 {
        f.clock.advance(1);
        f.backend
            .put(&Record::new(
                format!("p{i}"),
                "products",
                json!({"name": "x".repeat(60)}),
                i,
            ))
            .await
            .unwrap();
    }
    for i in 0..10 {
        f.clock.advance(1);
        f.engine
            .write(
                "messages",
                OperationKind::Add,
                &format!("m{i}"),
                json!({"text": "y".repeat(60)}),
            )
            .await
            .unwrap();
    }
    // acknowledge all but the two oldest messages
    for entry in f.engine.pending("messages").await.unwrap().into_iter().skip(2) {
        f.backend.dequeue(&entry.id).await.unwrap();
    }

    let report = f.engine.run_sync_cycle().await;
    let eviction = report.eviction.unwrap();
    assert!(eviction.total_evicted() > 0);
    assert!(eviction.skipped_pending >= 2);
    assert!(eviction.after.used_bytes <= 1_800);
    assert!(f.backend.get("messages", "m0").await.unwrap().is_some());
    assert!(f.backend.get("messages", "m1").await.unwrap().is_some());
    assert!(f.backend.get("messages", "m2").await.unwrap().is_none());

    let evicted = loop {
        if let SyncEvent::Evicted(report) = events.recv().await.unwrap() {
            break report;
        }
    };
    assert_eq!(evicted, eviction);
}

#[tokio::test]
async fn full_store_evicts_then_accepts_the_write() {
    let filler = Record::new("m0", "messages", json!({"text": "z".repeat(80)}), 0);
    let capacity = filler.stored_size() * 4;
    let f = fixture_with(fast_config(), |backend| backend.with_capacity(capacity));
    for i in 0..4 {
        let mut record = filler.clone();
        record.id = format!("m{i}");
        record.updated_at = i;
        f.backend.put(&record).await.unwrap();
    }

    let receipt = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    assert!(receipt.is_queued());
    assert!(f.backend.get("messages", "m0").await.unwrap().is_none());
    assert!(f.backend.get("messages", "m3").await.unwrap().is_some());
}

#[tokio::test]
async fn full_store_with_nothing_evictable_refuses_the_write() {
    let f = fixture_with(fast_config(), |backend| backend.with_capacity(10));
    let err = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ferry_engine::Error::Storage(ferry_engine::StorageError::QuotaExceeded { .. })
    ));
    assert_eq!(f.engine.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn immediate_write_delivered_but_not_stored_comes_back_on_pull() {
    // room for one pending message, not for anything next to it
    let f = fixture_with(
        EngineConfig {
            write_mode: WriteMode::Immediate,
            ..fast_config()
        },
        |backend| backend.with_capacity(490),
    );
    f.engine.network().set_status(NetworkStatus::Offline);
    f.engine
        .write("messages", OperationKind::Add, "m1", json!({"text": "x".repeat(200)}))
        .await
        .unwrap();
    f.engine.network().set_status(NetworkStatus::Online);

    let err = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ferry_engine::Error::Storage(ferry_engine::StorageError::QuotaExceeded { .. })
    ));
    assert!(f.remote.record("orders", "o1").is_some());
    assert!(f.engine.get("orders", "o1").await.unwrap().is_none());

    let blocker = f.engine.pending("messages").await.unwrap().remove(0);
    f.engine.discard_entry(&blocker.id).await.unwrap();
    f.engine.run_sync_cycle().await;

    assert_eq!(
        f.engine.get("orders", "o1").await.unwrap().unwrap().payload,
        json!({"total": 1})
    );
}

// ============================================================================
// Reentrancy
// ============================================================================

#[tokio::test]
async fn concurrent_cycle_requests_are_coalesced() {
    let f = fixture(EngineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 50,
            multiplier: 1.0,
            max_delay_ms: 50,
        },
        ..fast_config()
    });
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    // the first push fails once, so the cycle sleeps in its backoff
    f.remote.fail_pushes(1, NetworkError::Timeout.into());

    let (first, second) = tokio::join!(f.engine.run_sync_cycle(), async {
        tokio::task::yield_now().await;
        f.engine.run_sync_cycle().await
    });

    assert!(!first.deferred);
    assert!(second.deferred);
    assert_eq!(first.status, SyncStatus::Success);
    // the deferred request turned into one extra pass
    let fetches = f
        .remote
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RemoteCall::Fetch { collection, .. } if collection == "orders"))
        .count();
    assert_eq!(fetches, 2);
}
