//! Edge case tests for ferry-engine
//!
//! These tests cover boundary conditions and unusual inputs.

mod common;

use common::{fast_config, fixture};
use ferry_engine::remote::MemoryRemote;
use ferry_engine::store::{LocalStore, MemoryBackend};
use ferry_engine::{
    Error, IndexFilter, OperationKind, Schema, StorageError, SyncEngine, SyncStatus,
    ValidationError,
};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[tokio::test]
async fn unicode_payloads_round_trip_through_sync() {
    let f = fixture(fast_config());
    let texts = ["日本語テスト", "Привет мир", "مرحبا بالعالم", "🎉🚀💯", "Hello\nWorld\tTab"];
    for (i, text) in texts.iter().enumerate() {
        f.engine
            .write("messages", OperationKind::Add, &format!("m{i}"), json!({"text": text}))
            .await
            .unwrap();
    }
    f.engine.run_sync_cycle().await;

    for (i, text) in texts.iter().enumerate() {
        let remote = f.remote.record("messages", &format!("m{i}")).unwrap();
        assert_eq!(remote.payload["text"], *text);
    }
}

#[tokio::test]
async fn payload_must_be_an_object() {
    let f = fixture(fast_config());
    let err = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!([1, 2, 3]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidPayload(_))
    ));
}

#[tokio::test]
async fn null_required_field_is_missing() {
    let f = fixture(fast_config());
    let err = f
        .engine
        .write("orders", OperationKind::Add, "o1", json!({"total": null}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Validation(ValidationError::MissingRequiredField("total".into()))
    );
}

#[tokio::test]
async fn update_replaces_the_whole_payload() {
    let f = fixture(fast_config());
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1, "status": "open"}))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Update, "o1", json!({"total": 2}))
        .await
        .unwrap();

    let record = f.engine.get("orders", "o1").await.unwrap().unwrap();
    assert_eq!(record.payload, json!({"total": 2}));
}

// ============================================================================
// Lifecycle Edge Cases
// ============================================================================

#[tokio::test]
async fn delete_then_re_add_same_id_syncs() {
    let f = fixture(fast_config());
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 1}))
        .await
        .unwrap();
    f.engine.run_sync_cycle().await;

    f.engine
        .write("orders", OperationKind::Delete, "o1", json!(null))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Add, "o1", json!({"total": 5}))
        .await
        .unwrap();
    f.engine
        .write("orders", OperationKind::Add, "o2", json!({"total": 6}))
        .await
        .unwrap();
    let report = f.engine.run_sync_cycle().await;

    assert_eq!(report.status, SyncStatus::Success);
    let restored = f.remote.record("orders", "o1").unwrap();
    assert!(!restored.deleted);
    assert_eq!(restored.payload, json!({"total": 5}));
    assert_eq!(
        f.remote.record("orders", "o2").unwrap().payload,
        json!({"total": 6})
    );
    assert_eq!(f.engine.pending_count().await.unwrap(), 0);

    // the next pull brings back the restored copy, not the tombstone
    f.engine.run_sync_cycle().await;
    assert_eq!(
        f.engine.get("orders", "o1").await.unwrap().unwrap().payload,
        json!({"total": 5})
    );
}

#[tokio::test]
async fn tombstone_for_unknown_record_is_ignored() {
    let f = fixture(fast_config());
    f.remote.upsert("orders", "ghost", json!({"total": 1}));
    f.remote.remove("orders", "ghost");

    let report = f.engine.run_sync_cycle().await;
    let orders = report.collection("orders").unwrap();
    assert_eq!(orders.received, 1);
    assert_eq!(orders.merge.deleted, 0);
    assert_eq!(report.status, SyncStatus::Success);
    assert!(f.engine.get("orders", "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn schema_without_collections_syncs_trivially() {
    let schema = Arc::new(Schema::new());
    let engine = SyncEngine::new(
        Arc::new(MemoryBackend::new(schema.clone())),
        Arc::new(MemoryRemote::new()),
        schema,
        fast_config(),
    )
    .unwrap();

    let report = engine.run_sync_cycle().await;
    assert_eq!(report.status, SyncStatus::Success);
    assert!(report.collections.is_empty());
}

#[tokio::test]
async fn invalid_schema_is_refused_at_construction() {
    let schema = Arc::new(Schema::new().with_collection(ferry_engine::CollectionSchema::new(
        "orders; drop table records",
        vec![],
    )));
    let result = SyncEngine::new(
        Arc::new(MemoryBackend::new(schema.clone())),
        Arc::new(MemoryRemote::new()),
        schema,
        fast_config(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[tokio::test]
async fn limit_zero_returns_nothing() {
    let f = fixture(fast_config());
    f.engine
        .write("messages", OperationKind::Add, "m1", json!({"text": "a"}))
        .await
        .unwrap();
    assert!(f
        .engine
        .get_all("messages", None, Some(0))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn filter_on_undeclared_index_fails() {
    let f = fixture(fast_config());
    let err = f
        .engine
        .get_all("orders", Some(&IndexFilter::eq("byNothing", json!(1))), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::UnknownIndex { .. })
    ));
}

#[tokio::test]
async fn index_range_with_open_upper_bound() {
    let f = fixture(fast_config());
    for (id, channel) in [("m1", "alpha"), ("m2", "beta"), ("m3", "gamma")] {
        f.backend
            .put(&ferry_engine::Record::new(
                id,
                "messages",
                json!({"channel": channel}),
                1,
            ))
            .await
            .unwrap();
    }

    let filter = IndexFilter::range("byChannel", Some(json!("beta")), None);
    let ids: Vec<_> = f
        .engine
        .get_all("messages", Some(&filter), None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["m2", "m3"]);
}

// ============================================================================
// ID Edge Cases
// ============================================================================

#[tokio::test]
async fn ids_with_path_characters_reach_the_remote_intact() {
    let f = fixture(fast_config());
    let id = "a/b?c#d e";
    f.engine
        .write("orders", OperationKind::Add, id, json!({"total": 1}))
        .await
        .unwrap();
    f.engine.run_sync_cycle().await;
    assert!(f.remote.record("orders", id).is_some());
}

#[tokio::test]
async fn generated_ids_are_unique() {
    let f = fixture(fast_config());
    let mut ids = std::collections::HashSet::new();
    for _ in 0..100 {
        let receipt = f.engine.create("messages", json!({})).await.unwrap();
        assert!(ids.insert(receipt.record_id));
    }
}
