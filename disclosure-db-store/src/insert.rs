//! Execution of flattened write plans against the dynamic form tables.
//!
//! A [`WritePlan`] arrives from the flattening engine as typed cells; this
//! module renders one INSERT per row, binding each cell by its type. Every
//! business column writes two values: the typed column itself and its
//! `{name}_state` companion (NULL unless the cell carries a sentinel).

use crate::error::{Result, StoreError};
use disclosure_db_core::schema::TableDef;
use disclosure_db_core::value::{is_id_field, Cell, CellValue, RowWrite, WritePlan};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

/// Insert every row of the plan, inside one transaction.
pub async fn insert_plan(pool: &PgPool, plan: &WritePlan) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut row_count = 0usize;
    for table_write in &plan.tables {
        for row in &table_write.rows {
            let mut qb = insert_row_query(&table_write.table, row);
            qb.build().execute(&mut *tx).await?;
            row_count += 1;
        }
    }
    tx.commit().await?;
    debug!(rows = row_count, tables = plan.tables.len(), "write plan inserted");
    Ok(())
}

/// Render one row as an INSERT statement with typed binds.
fn insert_row_query<'a>(table: &str, row: &'a RowWrite) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ("));
    {
        let mut columns = qb.separated(", ");
        for (name, _) in row {
            columns.push(name.clone());
            if !is_id_field(name) {
                columns.push(format!("{name}_state"));
            }
        }
    }
    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        for (name, cell) in row {
            push_cell_bind(&mut values, cell);
            if !is_id_field(name) {
                values.push_bind(cell.state.map(|s| s.as_str().to_string()));
            }
        }
    }
    qb.push(")");
    qb
}

fn push_cell_bind<'a, 'qb>(
    values: &mut sqlx::query_builder::Separated<'qb, 'a, Postgres, &'static str>,
    cell: &'a Cell,
) {
    match &cell.value {
        // Typed NULL: the state column carries the sentinel, the value
        // column is a plain NULL. Binding as a nullable bigint is accepted
        // for every column type because the rendered expression is NULL.
        CellValue::Null => {
            values.push("NULL");
        }
        CellValue::Bool(v) => {
            values.push_bind(*v);
        }
        CellValue::Int(v) => {
            values.push_bind(*v);
        }
        CellValue::Float(v) => {
            values.push_bind(*v);
        }
        CellValue::Text(v) => {
            values.push_bind(v.clone());
        }
        CellValue::Timestamp(v) => {
            values.push_bind(*v);
        }
    }
}

/// Next available sub-form id for a root form: one above the maximum id
/// stored in any of its form-type columns, so freshly allocated sibling
/// sub-forms never collide with existing ones.
pub async fn next_form_id(pool: &PgPool, root: &TableDef) -> Result<i64> {
    let form_columns: Vec<&str> = root
        .columns
        .iter()
        .filter(|c| c.attribute_type.is_recursive())
        .map(|c| c.name.as_str())
        .collect();
    if form_columns.is_empty() {
        return Ok(1);
    }
    let sql = max_form_id_sql(&root.physical_name(), &form_columns);
    let row = sqlx::query(&sql).fetch_one(pool).await?;
    let max: Option<i64> = row.try_get(0)?;
    Ok(max.map(|m| m + 1).unwrap_or(1))
}

fn max_form_id_sql(table: &str, form_columns: &[&str]) -> String {
    let expr = if form_columns.len() == 1 {
        form_columns[0].to_string()
    } else {
        format!("GREATEST({})", form_columns.join(", "))
    };
    format!("SELECT MAX({expr}) FROM {table}")
}

/// Resolve the physical row id addressed by one level of an attribute path:
/// the rows of `table` for the submission, optionally filtered by a choice
/// column, selected by index.
pub async fn resolve_row_id(
    pool: &PgPool,
    table: &str,
    obj_id: i64,
    choice_field: Option<&str>,
    choice_value: Option<i64>,
    index: usize,
) -> Result<i64> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT id FROM {table} WHERE obj_id = "));
    qb.push_bind(obj_id);
    if let (Some(field), Some(value)) = (choice_field, choice_value) {
        qb.push(format!(" AND {field} = "));
        qb.push_bind(value);
    }
    qb.push(" ORDER BY id");
    let rows = qb.build().fetch_all(pool).await?;
    if rows.is_empty() {
        return Err(StoreError::not_found(format!(
            "no rows in '{table}' for submission {obj_id}"
        )));
    }
    if index >= rows.len() {
        return Err(StoreError::not_found(format!(
            "no row with index {index} in '{table}' for submission {obj_id}"
        )));
    }
    Ok(rows[index].try_get(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use disclosure_db_core::value::{NullState, TableWrite};

    #[test]
    fn max_form_id_sql_uses_greatest_for_multiple_columns() {
        assert_eq!(
            max_form_id_sql("disclosure_form", &["exclusions"]),
            "SELECT MAX(exclusions) FROM disclosure_form"
        );
        assert_eq!(
            max_form_id_sql("disclosure_form", &["exclusions", "frameworks"]),
            "SELECT MAX(GREATEST(exclusions, frameworks)) FROM disclosure_form"
        );
    }

    #[test]
    fn insert_statement_pairs_value_and_state_columns() {
        let row: RowWrite = vec![
            ("obj_id".to_string(), Cell::int(9)),
            ("value_id".to_string(), Cell::int(3)),
            ("pct".to_string(), Cell::new(CellValue::Float(12.5))),
            ("reason".to_string(), Cell::sentinel(NullState::NotApplicable)),
        ];
        let qb = insert_row_query("exclusions_heritable", &row);
        let sql = qb.into_sql();
        assert_eq!(
            sql,
            "INSERT INTO exclusions_heritable (obj_id, value_id, pct, pct_state, reason, reason_state) \
             VALUES ($1, $2, $3, $4, NULL, $5)"
        );
    }

    #[test]
    fn plan_row_count_sums_tables() {
        let plan = WritePlan {
            tables: vec![
                TableWrite { table: "a".into(), rows: vec![vec![], vec![]] },
                TableWrite { table: "b".into(), rows: vec![vec![]] },
            ],
        };
        assert_eq!(plan.row_count(), 3);
    }
}
