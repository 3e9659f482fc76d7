//! Ferry Server - reference remote for the Ferry offline-first engine.
//!
//! Serves the record contract the engine's `HttpRemote` speaks:
//!
//! - `GET /api/{collection}/sync?since=` returns records changed after `since`
//! - `POST /api/{collection}` creates, `PUT /api/{collection}/{id}` replaces
//!   the payload, `DELETE /api/{collection}/{id}` leaves a tombstone
//! - `GET /health`
//!
//! Every accepted write gets a strictly increasing `updatedAt` stamp.
//! Rejected writes answer 409 with the current record as the body.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::db::{MemoryRepository, RecordRepository};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn RecordRepository>,
}

impl AppState {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }

    /// State over a fresh in-memory repository.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRepository::new()))
    }
}

/// Build the router with tracing and permissive CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
