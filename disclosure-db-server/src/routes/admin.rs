//! Maintenance endpoints: schema refresh, aggregate validation, health.

use crate::error::Result;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/refresh-schema", post(refresh_schema))
        .route("/admin/validate-aggregates", post(validate_aggregates))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Reload the schema registry snapshot from the definition tables.
async fn refresh_schema(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    state.refresh_schema().await?;
    let snapshot = state.registry.snapshot();
    Ok(Json(json!({"generation": snapshot.generation})))
}

#[derive(Deserialize)]
struct ValidateParams {
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Recompute a page of submissions from the flat tables and diff each
/// against its cached aggregate. Drift is reported, never repaired here.
async fn validate_aggregates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValidateParams>,
) -> Result<impl IntoResponse> {
    let report = state
        .validator
        .validate_page(params.offset.unwrap_or(0), params.limit)
        .await?;
    Ok(Json(report))
}
