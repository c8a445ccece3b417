//! Revision endpoints: revise via restatements, edit-lock management,
//! rollback.

use crate::error::Result;
use crate::routes::current_user;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use disclosure_db_api::{RevisionManager, RevisionUpdate};
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/revisions/{name}", post(revise))
        .route("/revisions/{name}/checkout", post(checkout))
        .route("/revisions/{name}/release", post(release))
        .route("/revisions/{name}/rollback", post(rollback))
}

/// Apply a list of path-addressed restatements as a new revision.
async fn revise(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(input): Json<RevisionUpdate>,
) -> Result<impl IntoResponse> {
    let user = current_user(&headers);
    let manager = RevisionManager::load(state.manager.clone(), &name).await?;
    let view = manager
        .revise(
            &input.restatements,
            user,
            input.data_source,
            input.reporting_datetime,
            disclosure_db_store::submission::status::PUBLISHED,
        )
        .await?;
    Ok(Json(view))
}

/// Take the advisory edit lock on the active revision.
async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let user = current_user(&headers);
    let manager = RevisionManager::load(state.manager.clone(), &name).await?;
    let record = manager.checkout(user).await?;
    Ok(Json(record))
}

/// Release the advisory edit lock.
async fn release(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let user = current_user(&headers);
    let manager = RevisionManager::load(state.manager.clone(), &name).await?;
    let record = manager.release(user).await?;
    Ok(Json(record))
}

#[derive(Serialize)]
struct RollbackResponse {
    active_id: i64,
    active_revision: i64,
    prev_active_id: i64,
    prev_active_revision: i64,
}

/// Deactivate the current active revision and reactivate the previous one.
async fn rollback(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let manager = RevisionManager::load(state.manager.clone(), &name).await?;
    let (deactivated, reactivated) = manager.rollback().await?;
    Ok(Json(RollbackResponse {
        active_id: reactivated.id,
        active_revision: reactivated.revision,
        prev_active_id: deactivated.id,
        prev_active_revision: deactivated.revision,
    }))
}
