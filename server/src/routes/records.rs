//! Record endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use ferry_engine::Record;

use crate::error::Result;
use crate::handlers::{
    handle_create, handle_delete, handle_pull, handle_update, PullQuery, UpdateRequest,
    WriteOutcome,
};
use crate::AppState;

/// Create record routes.
///
/// `/api/{collection}/sync` shadows a record literally named `sync`, so that
/// route also answers PUT and DELETE for it.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/{collection}", post(create_handler))
        .route(
            "/api/{collection}/sync",
            get(pull_handler)
                .put(update_sync_handler)
                .delete(delete_sync_handler),
        )
        .route(
            "/api/{collection}/{id}",
            put(update_handler).delete(delete_handler),
        )
}

impl IntoResponse for WriteOutcome {
    fn into_response(self) -> Response {
        match self {
            WriteOutcome::Created(record) => (StatusCode::CREATED, Json(record)).into_response(),
            WriteOutcome::Accepted(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
            WriteOutcome::Accepted(None) => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// GET /api/{collection}/sync - Records changed since a timestamp.
async fn pull_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<Vec<Record>>> {
    let records = handle_pull(state.repo.as_ref(), &collection, query).await?;
    Ok(Json(records))
}

/// POST /api/{collection} - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(record): Json<Record>,
) -> Result<WriteOutcome> {
    handle_create(state.repo.as_ref(), &collection, record).await
}

/// PUT /api/{collection}/{id} - Replace a record's payload.
async fn update_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<UpdateRequest>,
) -> Result<WriteOutcome> {
    handle_update(state.repo.as_ref(), &collection, &id, request).await
}

/// DELETE /api/{collection}/{id} - Delete a record.
async fn delete_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(state.repo.as_ref(), &collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_sync_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<WriteOutcome> {
    handle_update(state.repo.as_ref(), &collection, "sync", request).await
}

async fn delete_sync_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<StatusCode> {
    handle_delete(state.repo.as_ref(), &collection, "sync").await?;
    Ok(StatusCode::NO_CONTENT)
}
