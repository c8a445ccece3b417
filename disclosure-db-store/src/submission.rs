//! Submission records: identity, revision chain, active flag and the
//! advisory edit lock.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

/// One row of `dd_obj`: a single revision of a logical submission.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionRecord {
    pub id: i64,
    pub table_view_id: i64,
    pub name: String,
    pub revision: i64,
    pub active: bool,
    pub activated_on: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub checked_out: bool,
    pub checked_out_on: Option<DateTime<Utc>>,
    pub permissions_set_id: Option<i64>,
    pub submitted_by: i64,
    pub data_source: Option<String>,
    pub status: Option<String>,
    pub lei: Option<String>,
    pub nz_id: i64,
}

/// Submission statuses stored in `dd_obj.status`.
pub mod status {
    pub const DRAFT: &str = "draft";
    pub const PUBLISHED: &str = "published";
}

/// Fields of a new submission revision.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub table_view_id: i64,
    pub name: String,
    pub revision: i64,
    pub submitted_by: i64,
    pub data_source: Option<String>,
    pub status: Option<String>,
    pub lei: Option<String>,
    pub nz_id: i64,
    pub permissions_set_id: Option<i64>,
}

/// Insert a new submission revision, returning the full record.
pub async fn insert(pool: &PgPool, new: &NewSubmission) -> Result<SubmissionRecord> {
    let record = sqlx::query_as::<_, SubmissionRecord>(
        "INSERT INTO dd_obj \
         (table_view_id, name, revision, active, activated_on, created_on, checked_out, \
          permissions_set_id, submitted_by, data_source, status, lei, nz_id) \
         VALUES ($1, $2, $3, TRUE, NOW(), NOW(), FALSE, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(new.table_view_id)
    .bind(&new.name)
    .bind(new.revision)
    .bind(new.permissions_set_id)
    .bind(new.submitted_by)
    .bind(&new.data_source)
    .bind(&new.status)
    .bind(&new.lei)
    .bind(new.nz_id)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

/// Fetch a submission revision by id.
pub async fn get(pool: &PgPool, id: i64) -> Result<SubmissionRecord> {
    sqlx::query_as::<_, SubmissionRecord>("SELECT * FROM dd_obj WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("submission {id}")))
}

/// Full revision history of a logical submission, newest revision first.
pub async fn revision_history(pool: &PgPool, name: &str) -> Result<Vec<SubmissionRecord>> {
    let records = sqlx::query_as::<_, SubmissionRecord>(
        "SELECT * FROM dd_obj WHERE name = $1 ORDER BY revision DESC",
    )
    .bind(name)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Highest existing submission id, for name generation.
pub async fn max_id(pool: &PgPool) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT MAX(id) FROM dd_obj").fetch_one(pool).await?;
    Ok(row.try_get(0)?)
}

/// Flip the active flag of one revision.
pub async fn set_active(pool: &PgPool, id: i64, active: bool) -> Result<()> {
    sqlx::query("UPDATE dd_obj SET active = $2, activated_on = NOW() WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(pool)
        .await?;
    Ok(())
}

/// Take or release the advisory edit lock on one revision.
pub async fn set_checked_out(
    pool: &PgPool,
    id: i64,
    user_id: Option<i64>,
    checked_out: bool,
) -> Result<()> {
    if checked_out {
        sqlx::query(
            "UPDATE dd_obj SET checked_out = TRUE, checked_out_on = NOW(), user_id = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "UPDATE dd_obj SET checked_out = FALSE, checked_out_on = NULL, user_id = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Update status of one revision.
pub async fn set_status(pool: &PgPool, id: i64, status: &str) -> Result<()> {
    sqlx::query("UPDATE dd_obj SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(())
}

/// The active submission id of an organization for a reporting year,
/// resolved through the root form table. Latest revision wins.
pub async fn active_id_by_lei_and_year(
    pool: &PgPool,
    root_table: &str,
    lei: &str,
    reporting_year: i64,
) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT f.obj_id FROM {root_table} f \
         JOIN dd_obj s ON s.id = f.obj_id \
         WHERE s.lei = $1 AND s.active AND f.reporting_year = $2 \
         ORDER BY s.revision DESC LIMIT 1",
    );
    let row = sqlx::query(&sql)
        .bind(lei)
        .bind(reporting_year)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.try_get(0)).transpose()?)
}

/// Count submissions of an organization for a reporting year. Used by the
/// duplicate-submission check.
pub async fn count_for_year(
    pool: &PgPool,
    root_table: &str,
    nz_id: i64,
    reporting_year: i64,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {root_table} f \
         JOIN dd_obj s ON s.id = f.obj_id \
         WHERE s.nz_id = $1 AND f.reporting_year = $2",
    );
    let row = sqlx::query(&sql)
        .bind(nz_id)
        .bind(reporting_year)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get(0)?)
}

/// Page of submission ids ordered by id, for the aggregate validator.
pub async fn page_ids(pool: &PgPool, offset: i64, limit: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT id FROM dd_obj ORDER BY id OFFSET $1 LIMIT $2")
        .bind(offset)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|r| r.try_get(0).map_err(StoreError::from))
        .collect()
}

/// Total number of submission revisions.
pub async fn count_all(pool: &PgPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM dd_obj").fetch_one(pool).await?;
    Ok(row.try_get(0)?)
}

/// Fetch several submission records at once.
pub async fn get_many(pool: &PgPool, ids: &[i64]) -> Result<Vec<SubmissionRecord>> {
    let records = sqlx::query_as::<_, SubmissionRecord>(
        "SELECT * FROM dd_obj WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(records)
}
