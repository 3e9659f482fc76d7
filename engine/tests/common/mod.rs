//! Shared fixtures for integration tests.

#![allow(dead_code)]

use ferry_engine::remote::MemoryRemote;
use ferry_engine::store::MemoryBackend;
use ferry_engine::{
    CollectionSchema, EngineConfig, FieldDef, FieldType, ManualClock, RetryPolicy, Schema,
    SyncEngine,
};
use std::sync::Arc;

pub fn test_schema() -> Schema {
    Schema::new()
        .with_collection(CollectionSchema::new(
            "orders",
            vec![
                FieldDef::required("total", FieldType::Float),
                FieldDef::optional("status", FieldType::String),
            ],
        ))
        .with_collection(
            CollectionSchema::new("messages", vec![FieldDef::optional("text", FieldType::String)])
                .with_index("byChannel", "channel")
                .evictable(0),
        )
        .with_collection(CollectionSchema::new("products", vec![]).evictable(1))
}

/// Config with instant retries so failure paths don't sleep.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy::immediate(3),
        ..EngineConfig::default()
    }
}

pub struct Fixture {
    pub engine: SyncEngine,
    pub backend: Arc<MemoryBackend>,
    pub remote: Arc<MemoryRemote>,
    pub clock: Arc<ManualClock>,
}

pub fn fixture(config: EngineConfig) -> Fixture {
    fixture_with(config, |backend| backend)
}

pub fn fixture_with(
    config: EngineConfig,
    customize: impl FnOnce(MemoryBackend) -> MemoryBackend,
) -> Fixture {
    let schema = Arc::new(test_schema());
    let backend = Arc::new(customize(MemoryBackend::new(schema.clone())));
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let engine = SyncEngine::new(backend.clone(), remote.clone(), schema, config)
        .unwrap()
        .with_clock(clock.clone());
    Fixture {
        engine,
        backend,
        remote,
        clock,
    }
}
