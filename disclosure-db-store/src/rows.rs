//! Dynamic form-table row fetch.
//!
//! One submission's rows live across many physical tables (one per
//! (sub-)form). [`fetch_form_storage`] issues one query per table, chunks
//! the queries into batches, runs each batch on its own pooled connection
//! and joins with first-failure semantics: either every batch completes or
//! the whole fetch fails. Each batch is bounded by a timeout so a stuck
//! connection cannot hang a reconstruction indefinitely.

use crate::error::{Result, StoreError};
use crate::registry::SchemaSnapshot;
use disclosure_db_core::schema::{AttributeType, ColumnDef, TableDef};
use disclosure_db_core::value::{Cell, CellValue, FormRow, FormStorage, NullState};
use futures::future::try_join_all;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Batch sizing and deadline for the concurrent fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Number of table queries grouped onto one connection.
    pub batch_size: usize,
    /// Deadline for a whole batch.
    pub batch_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            batch_size: 80,
            batch_timeout: Duration::from_secs(30),
        }
    }
}

/// Fetch every row belonging to `submission_id` across the given table
/// definitions into a [`FormStorage`].
pub async fn fetch_form_storage(
    pool: &PgPool,
    tables: &[Arc<TableDef>],
    submission_id: i64,
    options: FetchOptions,
) -> Result<FormStorage> {
    let batch_size = options.batch_size.max(1);
    let batches: Vec<Vec<Arc<TableDef>>> = tables
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    debug!(
        submission_id,
        tables = tables.len(),
        batches = batches.len(),
        "fetching form rows"
    );

    let futures = batches.into_iter().map(|batch| {
        let pool = pool.clone();
        async move {
            match tokio::time::timeout(options.batch_timeout, fetch_batch(&pool, &batch, submission_id))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::BatchTimeout(options.batch_timeout)),
            }
        }
    });

    let mut storage = FormStorage::new();
    for batch_result in try_join_all(futures).await? {
        for (table, rows) in batch_result {
            storage.insert_table(table, rows);
        }
    }
    Ok(storage)
}

/// Fetch one batch of tables sequentially on a single connection.
async fn fetch_batch(
    pool: &PgPool,
    tables: &[Arc<TableDef>],
    submission_id: i64,
) -> Result<Vec<(String, Vec<FormRow>)>> {
    let mut conn = pool.acquire().await?;
    let mut out = Vec::with_capacity(tables.len());
    for td in tables {
        let table = td.physical_name();
        let sql = select_rows_sql(td);
        let rows = sqlx::query(&sql)
            .bind(submission_id)
            .fetch_all(&mut *conn)
            .await?;
        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            decoded.push(decode_row(&row, td)?);
        }
        out.push((table, decoded));
    }
    Ok(out)
}

/// The per-table fetch statement. Heritable tables come back newest parent
/// occurrence first, stable within an occurrence; list order downstream is
/// exactly this order.
fn select_rows_sql(td: &TableDef) -> String {
    let table = td.physical_name();
    if td.heritable {
        format!("SELECT * FROM {table} WHERE obj_id = $1 ORDER BY value_id DESC, id")
    } else {
        format!("SELECT * FROM {table} WHERE obj_id = $1 ORDER BY id")
    }
}

/// Decode one fetched row into typed cells, driven by the declared column
/// types.
fn decode_row(row: &PgRow, td: &TableDef) -> Result<FormRow> {
    let table = td.physical_name();
    let mut out = FormRow::new();

    for id_field in ["id", "obj_id"] {
        let value: Option<i64> = row
            .try_get(id_field)
            .map_err(|e| decode_error(&table, id_field, e))?;
        out.insert(id_field.to_string(), int_cell(value));
    }
    if td.heritable {
        let value: Option<i64> = row
            .try_get("value_id")
            .map_err(|e| decode_error(&table, "value_id", e))?;
        out.insert("value_id".to_string(), int_cell(value));
    }

    for column in &td.columns {
        let cell = decode_cell(row, &table, column)?;
        out.insert(column.name.clone(), cell);
    }
    Ok(out)
}

fn decode_cell(row: &PgRow, table: &str, column: &ColumnDef) -> Result<Cell> {
    let name = column.name.as_str();
    let state: Option<String> = row
        .try_get(format!("{name}_state").as_str())
        .map_err(|e| decode_error(table, name, e))?;
    let state = state.as_deref().and_then(NullState::parse);

    let value = match column.attribute_type {
        AttributeType::Bool => row
            .try_get::<Option<bool>, _>(name)
            .map_err(|e| decode_error(table, name, e))?
            .map(CellValue::Bool),
        AttributeType::Int
        | AttributeType::Single
        | AttributeType::File
        | AttributeType::Form
        | AttributeType::FormOrNull
        | AttributeType::Multiple => row
            .try_get::<Option<i64>, _>(name)
            .map_err(|e| decode_error(table, name, e))?
            .map(CellValue::Int),
        AttributeType::Float => row
            .try_get::<Option<f64>, _>(name)
            .map_err(|e| decode_error(table, name, e))?
            .map(CellValue::Float),
        AttributeType::Text | AttributeType::Label => row
            .try_get::<Option<String>, _>(name)
            .map_err(|e| decode_error(table, name, e))?
            .map(CellValue::Text),
        AttributeType::Datetime => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
            .map_err(|e| decode_error(table, name, e))?
            .map(CellValue::Timestamp),
    };

    Ok(Cell {
        value: value.unwrap_or(CellValue::Null),
        state,
    })
}

fn int_cell(value: Option<i64>) -> Cell {
    Cell::new(value.map(CellValue::Int).unwrap_or(CellValue::Null))
}

fn decode_error(table: &str, column: &str, e: sqlx::Error) -> StoreError {
    StoreError::Decode {
        table: table.to_string(),
        column: column.to_string(),
        message: e.to_string(),
    }
}

/// Collect the table definitions relevant to a submission: the root form
/// first, then every reachable sub-form.
pub fn submission_table_defs(
    snapshot: &SchemaSnapshot,
    root: &Arc<TableDef>,
) -> Vec<Arc<TableDef>> {
    let mut tables = vec![root.clone()];
    tables.extend(snapshot.collect_sub_table_defs(root));
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_def(json: serde_json::Value) -> TableDef {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn select_sql_orders_heritable_by_parent_occurrence() {
        let td = table_def(json!({"id": 2, "name": "exclusions", "heritable": true, "columns": []}));
        assert_eq!(
            select_rows_sql(&td),
            "SELECT * FROM exclusions_heritable WHERE obj_id = $1 ORDER BY value_id DESC, id"
        );
        let td = table_def(json!({"id": 1, "name": "disclosure_form", "heritable": false, "columns": []}));
        assert_eq!(
            select_rows_sql(&td),
            "SELECT * FROM disclosure_form WHERE obj_id = $1 ORDER BY id"
        );
    }

    #[test]
    fn collects_nested_table_defs_depth_first() {
        let root = table_def(json!({
            "id": 1, "name": "disclosure_form", "heritable": false,
            "columns": [
                {"id": 10, "name": "total_emissions", "table_def_id": 1, "attribute_type": "float"},
                {"id": 11, "name": "exclusions", "table_def_id": 1, "attribute_type": "form", "attribute_type_id": 2},
                {"id": 12, "name": "frameworks", "table_def_id": 1, "attribute_type": "multiple", "attribute_type_id": 3}
            ]
        }));
        let exclusions = table_def(json!({
            "id": 2, "name": "exclusions", "heritable": true,
            "columns": [
                {"id": 20, "name": "pct", "table_def_id": 2, "attribute_type": "float"},
                {"id": 21, "name": "excl_detail", "table_def_id": 2, "attribute_type": "form", "attribute_type_id": 4}
            ]
        }));
        let frameworks = table_def(json!({"id": 3, "name": "frameworks", "heritable": true, "columns": []}));
        let detail = table_def(json!({"id": 4, "name": "excl_detail", "heritable": true, "columns": []}));

        let snapshot = SchemaSnapshot::from_definitions(
            "disclosure_form",
            vec![root, exclusions, frameworks, detail],
            vec![],
            vec![],
            vec![],
        );
        let root = snapshot.table_def_by_name("disclosure_form").unwrap().clone();
        let tables = submission_table_defs(&snapshot, &root);
        let names: Vec<String> = tables.iter().map(|t| t.physical_name()).collect();
        assert_eq!(
            names,
            vec![
                "disclosure_form",
                "exclusions_heritable",
                "excl_detail_heritable",
                "frameworks_heritable"
            ]
        );
    }
}
