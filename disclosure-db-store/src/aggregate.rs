//! The aggregate cache table: one fully materialized submission per row.

use crate::error::Result;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

/// Upsert the whole materialized submission for `obj_id`. There is no
/// partial update: the document is always replaced entirely.
pub async fn upsert(
    pool: &PgPool,
    obj_id: i64,
    table_def_id: Option<i64>,
    data: &JsonValue,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO dd_aggregated_obj_view (obj_id, table_def_id, data, created_on) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (obj_id) DO UPDATE \
         SET table_def_id = EXCLUDED.table_def_id, data = EXCLUDED.data, created_on = NOW()",
    )
    .bind(obj_id)
    .bind(table_def_id)
    .bind(data)
    .execute(pool)
    .await?;
    Ok(())
}

/// The cached document for one submission, if present.
pub async fn load(pool: &PgPool, obj_id: i64) -> Result<Option<JsonValue>> {
    let row = sqlx::query("SELECT data FROM dd_aggregated_obj_view WHERE obj_id = $1")
        .bind(obj_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.try_get("data")).transpose()?)
}

/// The cached documents for a set of submissions. Missing ids are simply
/// absent from the result.
pub async fn load_many(pool: &PgPool, obj_ids: &[i64]) -> Result<Vec<(i64, JsonValue)>> {
    let rows = sqlx::query("SELECT obj_id, data FROM dd_aggregated_obj_view WHERE obj_id = ANY($1)")
        .bind(obj_ids)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|r| Ok((r.try_get("obj_id")?, r.try_get("data")?)))
        .collect()
}
