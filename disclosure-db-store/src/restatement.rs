//! Restatement rows: the append-only audit trail of path-addressed edits.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// One persisted restatement.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RestatementRecord {
    pub id: i64,
    /// The revision this restatement was applied to.
    pub obj_id: i64,
    /// Shared across the whole revision chain: the id of revision 1.
    pub group_id: i64,
    /// The attribute path string addressing the edited field.
    pub attribute_name: String,
    /// The physical row id the path resolved to at restatement time.
    pub attribute_row: i64,
    pub reason_for_restatement: String,
    pub data_source: Option<String>,
    pub reporting_datetime: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

/// Fields of a new restatement.
#[derive(Debug, Clone)]
pub struct NewRestatement {
    pub obj_id: i64,
    pub group_id: i64,
    pub attribute_name: String,
    pub attribute_row: i64,
    pub reason_for_restatement: String,
    pub data_source: Option<String>,
    pub reporting_datetime: Option<DateTime<Utc>>,
}

/// Append one restatement. Restatements are never updated or deleted, only
/// superseded by later restatements on the same path.
pub async fn insert(pool: &PgPool, new: &NewRestatement) -> Result<RestatementRecord> {
    let record = sqlx::query_as::<_, RestatementRecord>(
        "INSERT INTO dd_restatement \
         (obj_id, group_id, attribute_name, attribute_row, reason_for_restatement, \
          data_source, reporting_datetime, created_on) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
         RETURNING *",
    )
    .bind(new.obj_id)
    .bind(new.group_id)
    .bind(&new.attribute_name)
    .bind(new.attribute_row)
    .bind(&new.reason_for_restatement)
    .bind(&new.data_source)
    .bind(new.reporting_datetime)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

/// All restatements applied to one revision, in creation order.
pub async fn list_for_submission(pool: &PgPool, obj_id: i64) -> Result<Vec<RestatementRecord>> {
    let records = sqlx::query_as::<_, RestatementRecord>(
        "SELECT * FROM dd_restatement WHERE obj_id = $1 ORDER BY id",
    )
    .bind(obj_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// All restatements of a revision chain, in creation order.
pub async fn list_for_group(pool: &PgPool, group_id: i64) -> Result<Vec<RestatementRecord>> {
    let records = sqlx::query_as::<_, RestatementRecord>(
        "SELECT * FROM dd_restatement WHERE group_id = $1 ORDER BY id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Restatements across every revision of a logical submission (joined by
/// name), in revision order. Used when annotating search/export output.
pub async fn list_for_name(pool: &PgPool, name: &str) -> Result<Vec<RestatementRecord>> {
    let records = sqlx::query_as::<_, RestatementRecord>(
        "SELECT r.* FROM dd_restatement r \
         JOIN dd_obj s ON s.id = r.obj_id \
         WHERE s.name = $1 ORDER BY s.id, r.id",
    )
    .bind(name)
    .fetch_all(pool)
    .await?;
    Ok(records)
}
