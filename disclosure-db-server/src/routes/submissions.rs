//! Submission endpoints: create, read, fill values, restatement listing.

use crate::error::Result;
use crate::routes::current_user;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use disclosure_db_api::SubmissionCreate;
use disclosure_db_store::restatement;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(create))
        .route("/submissions/{id}", get(get_submission))
        .route("/submissions/{id}/values", post(update_values))
        .route("/submissions/{id}/restatements", get(list_restatements))
        .route("/submissions/by-lei/{lei}/{year}", get(get_by_lei_and_year))
}

/// Create a submission. Values, when provided, are flattened and inserted
/// immediately; a bodyless shell is created checked out to the caller.
async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<SubmissionCreate>,
) -> Result<impl IntoResponse> {
    let user = current_user(&headers);
    state.manager.check_duplicate(input.nz_id, &input.values).await?;
    let view = state
        .manager
        .create(input, user, disclosure_db_store::submission::status::DRAFT)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = state
        .loader
        .load(id, state.config.use_aggregate, false)
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct UpdateValues {
    values: JsonValue,
}

/// Fill an empty submission with values.
async fn update_values(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateValues>,
) -> Result<impl IntoResponse> {
    let view = state.manager.update(id, &input.values).await?;
    Ok(Json(view))
}

async fn list_restatements(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let records = restatement::list_for_submission(&state.pool, id)
        .await
        .map_err(disclosure_db_api::ApiError::from)?;
    Ok(Json(records))
}

async fn get_by_lei_and_year(
    State(state): State<Arc<AppState>>,
    Path((lei, year)): Path<(String, i64)>,
) -> Result<impl IntoResponse> {
    let view = state
        .loader
        .load_by_lei_and_year(year, &lei, state.config.use_aggregate, false)
        .await?;
    Ok(Json(view))
}
