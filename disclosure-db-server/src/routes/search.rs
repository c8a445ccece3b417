//! Search endpoint.

use crate::error::Result;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use disclosure_db_store::SearchQuery;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/search", post(search))
}

#[derive(Deserialize)]
struct SearchParams {
    table_view_id: i64,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

/// Run a search over active submissions of one published schema revision.
async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
    Json(query): Json<SearchQuery>,
) -> Result<impl IntoResponse> {
    let results = state
        .search
        .search(
            &query,
            params.table_view_id,
            params.limit,
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(results))
}
