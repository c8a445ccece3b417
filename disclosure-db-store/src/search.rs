//! Search/sort SQL builder.
//!
//! Builds the composed query against the base form table, joining the
//! organization and submission tables, applying meta filters, and sorting
//! by keys that may live inside heritable nested forms. A nested sort key
//! joins its `_heritable` table (optionally filtered by a choice
//! field/value) and orders by a correlated scalar subquery with explicit
//! NULL ordering, so null-valued nested attributes sort consistently
//! regardless of storage engine default.

use crate::error::{Result, StoreError};
use crate::registry::SchemaSnapshot;
use disclosure_db_core::path::AttributePath;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// Sort direction. DESC pushes NULLs last, ASC pushes them first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort key: an attribute path string plus a direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

/// Filter lists applied to the base query. Empty lists mean "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub jurisdiction: Vec<String>,
    #[serde(default)]
    pub reporting_year: Vec<i64>,
    #[serde(default)]
    pub data_model: Vec<String>,
    #[serde(default)]
    pub sics_sector: Vec<String>,
    #[serde(default)]
    pub sics_sub_sector: Vec<String>,
    #[serde(default)]
    pub sics_industry: Vec<String>,
}

impl SearchMeta {
    /// Field names a sort key may reference without being a schema column.
    pub fn field_names() -> &'static [&'static str] {
        &[
            "jurisdiction",
            "reporting_year",
            "data_model",
            "sics_sector",
            "sics_sub_sector",
            "sics_industry",
        ]
    }
}

/// A search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub meta: SearchMeta,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    /// Attribute paths to keep in each hit's values; empty keeps everything.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// One decoded base-query row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SearchHit {
    pub obj_id: i64,
    pub legal_name: String,
    pub lei: String,
    pub nz_id: i64,
    pub jurisdiction: Option<String>,
    pub reporting_year: Option<i64>,
    pub data_model: Option<String>,
    pub sics_sector: Option<String>,
    pub sics_sub_sector: Option<String>,
    pub sics_industry: Option<String>,
}

/// A join required by a nested sort key.
#[derive(Debug, Clone, PartialEq)]
struct JoinClause {
    table: String,
    choice: Option<(String, i64)>,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
enum OrderClause {
    /// Direct column on the base form (`f.`) or organization (`o.`) table.
    Direct { expr: String, order: SortOrder },
    /// Correlated scalar subquery into a heritable nested form table.
    Nested {
        table: String,
        attribute: String,
        choice: Option<(String, i64)>,
        order: SortOrder,
    },
}

/// Builds the search statement for one schema snapshot and table view.
pub struct SearchQueryBuilder<'a> {
    snapshot: &'a SchemaSnapshot,
    query: &'a SearchQuery,
    table_view_id: i64,
    submission_ids: Option<&'a [i64]>,
    limit: Option<i64>,
    offset: i64,
}

impl<'a> SearchQueryBuilder<'a> {
    pub fn new(snapshot: &'a SchemaSnapshot, query: &'a SearchQuery, table_view_id: i64) -> Self {
        SearchQueryBuilder {
            snapshot,
            query,
            table_view_id,
            submission_ids: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn submission_ids(mut self, ids: &'a [i64]) -> Self {
        self.submission_ids = Some(ids);
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// The full statement: filters, sorts, pagination.
    pub fn build(&self) -> Result<QueryBuilder<'a, Postgres>> {
        let (joins, orders) = self.plan_sorts()?;
        let mut qb = self.base_select(&joins)?;
        self.push_order_by(&mut qb, &orders);
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }
        if self.offset > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(self.offset);
        }
        Ok(qb)
    }

    /// `SELECT COUNT(*)` over the filtered query (no sort, no pagination).
    pub fn build_count(&self) -> Result<QueryBuilder<'a, Postgres>> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*)");
        self.push_from_and_filters(&mut qb, &[])?;
        Ok(qb)
    }

    /// Distinct company count over the filtered query.
    pub fn build_company_count(&self) -> Result<QueryBuilder<'a, Postgres>> {
        let mut qb = QueryBuilder::new("SELECT COUNT(DISTINCT o.legal_name)");
        self.push_from_and_filters(&mut qb, &[])?;
        Ok(qb)
    }

    fn base_select(&self, joins: &[JoinClause]) -> Result<QueryBuilder<'a, Postgres>> {
        let mut qb = QueryBuilder::new(
            "SELECT f.obj_id, o.legal_name, o.lei, o.nz_id, o.jurisdiction, \
             f.reporting_year, f.data_model, o.sics_sector, o.sics_sub_sector, o.sics_industry",
        );
        self.push_from_and_filters(&mut qb, joins)?;
        Ok(qb)
    }

    fn push_from_and_filters(
        &self,
        qb: &mut QueryBuilder<'a, Postgres>,
        joins: &[JoinClause],
    ) -> Result<()> {
        let root_table = self.snapshot.root_table()?;
        qb.push(format!(
            " FROM {root_table} f \
             JOIN dd_obj s ON s.id = f.obj_id \
             JOIN dd_organization o ON o.nz_id = s.nz_id"
        ));
        for join in joins {
            qb.push(format!(
                " JOIN {table} ON {table}.obj_id = f.obj_id",
                table = join.table
            ));
            if let Some((field, value)) = &join.choice {
                qb.push(format!(" AND {table}.{field} = ", table = join.table));
                qb.push_bind(*value);
            }
        }

        qb.push(" WHERE s.table_view_id = ");
        qb.push_bind(self.table_view_id);
        qb.push(" AND s.active = TRUE");

        let meta = &self.query.meta;
        if !meta.jurisdiction.is_empty() {
            qb.push(" AND o.jurisdiction = ANY(");
            qb.push_bind(meta.jurisdiction.clone());
            qb.push(")");
        }
        if !meta.reporting_year.is_empty() {
            qb.push(" AND f.reporting_year = ANY(");
            qb.push_bind(meta.reporting_year.clone());
            qb.push(")");
        }
        if !meta.data_model.is_empty() {
            qb.push(" AND f.data_model = ANY(");
            qb.push_bind(meta.data_model.clone());
            qb.push(")");
        }
        for (column, values) in [
            ("sics_sector", &meta.sics_sector),
            ("sics_sub_sector", &meta.sics_sub_sector),
            ("sics_industry", &meta.sics_industry),
        ] {
            if !values.is_empty() {
                qb.push(format!(" AND o.{column} = ANY("));
                qb.push_bind(values.clone());
                qb.push(")");
            }
        }
        if let Some(ids) = self.submission_ids {
            qb.push(" AND s.id = ANY(");
            qb.push_bind(ids.to_vec());
            qb.push(")");
        }
        Ok(())
    }

    fn push_order_by(&self, qb: &mut QueryBuilder<'a, Postgres>, orders: &[OrderClause]) {
        if orders.is_empty() {
            return;
        }
        qb.push(" ORDER BY ");
        for (i, clause) in orders.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            match clause {
                OrderClause::Direct { expr, order } => {
                    qb.push(format!(
                        "{expr} {}",
                        match order {
                            SortOrder::Asc => "ASC",
                            SortOrder::Desc => "DESC",
                        }
                    ));
                }
                OrderClause::Nested {
                    table,
                    attribute,
                    choice,
                    order,
                } => {
                    qb.push(format!(
                        "(SELECT {table}.{attribute} FROM {table} \
                         WHERE {table}.obj_id = f.obj_id AND {table}.{attribute} IS NOT NULL"
                    ));
                    if let Some((field, value)) = choice {
                        qb.push(format!(" AND {table}.{field} = "));
                        qb.push_bind(*value);
                    }
                    // Explicit NULL ordering: NULLS LAST when descending,
                    // NULLS FIRST when ascending.
                    qb.push(match order {
                        SortOrder::Asc => " LIMIT 1) ASC NULLS FIRST",
                        SortOrder::Desc => " LIMIT 1) DESC NULLS LAST",
                    });
                }
            }
        }
    }

    /// Resolve every sort key into join and order clauses.
    fn plan_sorts(&self) -> Result<(Vec<JoinClause>, Vec<OrderClause>)> {
        let mut joins = Vec::new();
        let mut orders = Vec::new();
        for spec in &self.query.sort {
            let path = AttributePath::parse(&spec.field)?;
            let attribute = path.leaf().attribute.clone();
            match self.snapshot.column_def(&attribute) {
                None => orders.push(self.plan_plain_sort(&attribute, spec.order)?),
                Some(column) => {
                    let owning = self.snapshot.owning_table_def(column).ok_or_else(|| {
                        StoreError::search(format!(
                            "column '{attribute}' has no owning table definition"
                        ))
                    })?;
                    if owning.heritable {
                        self.plan_nested_sort(&path, spec.order, &mut joins, &mut orders)?;
                    } else {
                        orders.push(OrderClause::Direct {
                            expr: format!("f.{attribute}"),
                            order: spec.order,
                        });
                    }
                }
            }
        }
        Ok((joins, orders))
    }

    /// A sort key that is not a schema column: allowed only for the meta
    /// fields and the organization identity columns.
    fn plan_plain_sort(&self, attribute: &str, order: SortOrder) -> Result<OrderClause> {
        let allowed = SearchMeta::field_names();
        if attribute == "legal_name" || attribute == "lei" {
            return Ok(OrderClause::Direct {
                expr: format!("o.{attribute}"),
                order,
            });
        }
        if !allowed.contains(&attribute) {
            return Err(StoreError::search(format!("invalid sort field '{attribute}'")));
        }
        let expr = match attribute {
            "reporting_year" | "data_model" => format!("f.{attribute}"),
            other => format!("o.{other}"),
        };
        Ok(OrderClause::Direct { expr, order })
    }

    /// A sort key inside a heritable nested form: join every intermediate
    /// form table, then order by a correlated subquery on the leaf table.
    fn plan_nested_sort(
        &self,
        path: &AttributePath,
        order: SortOrder,
        joins: &mut Vec<JoinClause>,
        orders: &mut Vec<OrderClause>,
    ) -> Result<()> {
        let mut node = path;
        loop {
            let form = node.form.as_deref().ok_or_else(|| {
                StoreError::search(format!(
                    "missing form in request for column '{}'",
                    node.attribute
                ))
            })?;
            let table = self.form_table(form)?;
            let choice = match (&node.choice.field, node.choice.value) {
                (Some(field), Some(value)) => Some((field.clone(), value)),
                _ => None,
            };
            match &node.sub_path {
                Some(sub) => {
                    joins.push(JoinClause { table, choice });
                    node = sub;
                }
                None => {
                    orders.push(OrderClause::Nested {
                        table,
                        attribute: node.attribute.clone(),
                        choice,
                        order,
                    });
                    return Ok(());
                }
            }
        }
    }

    /// The physical table behind a form key: the referenced table of the
    /// form-typed column with that name.
    fn form_table(&self, form: &str) -> Result<String> {
        let column = self
            .snapshot
            .column_def(form)
            .ok_or_else(|| StoreError::search(format!("unknown form '{form}' in sort path")))?;
        let sub = self
            .snapshot
            .sub_table_def(column)
            .ok_or_else(|| StoreError::search(format!("'{form}' is not a form column")))?;
        Ok(sub.physical_name())
    }
}

/// Run the built statement, decoding base rows.
pub async fn run_search(pool: &PgPool, mut qb: QueryBuilder<'_, Postgres>) -> Result<Vec<SearchHit>> {
    let rows = qb.build_query_as::<SearchHit>().fetch_all(pool).await?;
    Ok(rows)
}

/// Run a COUNT statement.
pub async fn run_count(pool: &PgPool, mut qb: QueryBuilder<'_, Postgres>) -> Result<i64> {
    let row = qb.build().fetch_one(pool).await?;
    Ok(row.try_get(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use disclosure_db_core::schema::TableDef;
    use serde_json::json;

    fn snapshot() -> SchemaSnapshot {
        let root: TableDef = serde_json::from_value(json!({
            "id": 1, "name": "disclosure_form", "heritable": false,
            "columns": [
                {"id": 10, "name": "reporting_year", "table_def_id": 1, "attribute_type": "int"},
                {"id": 11, "name": "data_model", "table_def_id": 1, "attribute_type": "text"},
                {"id": 12, "name": "total_emissions", "table_def_id": 1, "attribute_type": "float"},
                {"id": 13, "name": "exclusions", "table_def_id": 1, "attribute_type": "form", "attribute_type_id": 2}
            ]
        }))
        .unwrap();
        let exclusions: TableDef = serde_json::from_value(json!({
            "id": 2, "name": "exclusions", "heritable": true,
            "columns": [
                {"id": 20, "name": "pct", "table_def_id": 2, "attribute_type": "float"},
                {"id": 21, "name": "excl_reason", "table_def_id": 2, "attribute_type": "single", "choice_set_id": 5}
            ]
        }))
        .unwrap();
        SchemaSnapshot::from_definitions(
            "disclosure_form",
            vec![root, exclusions],
            vec![],
            vec![],
            vec![],
        )
    }

    #[test]
    fn base_query_filters_active_table_view() {
        let snapshot = snapshot();
        let query = SearchQuery::default();
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        let sql = qb.into_sql();
        assert!(sql.starts_with("SELECT f.obj_id, o.legal_name, o.lei"));
        assert!(sql.contains("FROM disclosure_form f"));
        assert!(sql.contains("JOIN dd_obj s ON s.id = f.obj_id"));
        assert!(sql.contains("WHERE s.table_view_id = $1 AND s.active = TRUE"));
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn meta_filters_become_any_clauses() {
        let snapshot = snapshot();
        let query = SearchQuery {
            meta: SearchMeta {
                jurisdiction: vec!["DE".into()],
                reporting_year: vec![2022, 2023],
                ..SearchMeta::default()
            },
            ..SearchQuery::default()
        };
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        let sql = qb.into_sql();
        assert!(sql.contains("o.jurisdiction = ANY($2)"));
        assert!(sql.contains("f.reporting_year = ANY($3)"));
    }

    #[test]
    fn direct_sort_on_base_form_column() {
        let snapshot = snapshot();
        let query = SearchQuery {
            sort: vec![SortSpec { field: "total_emissions".into(), order: SortOrder::Desc }],
            ..SearchQuery::default()
        };
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        let sql = qb.into_sql();
        assert!(sql.contains("ORDER BY f.total_emissions DESC"));
    }

    #[test]
    fn nested_sort_emits_correlated_subquery_with_null_ordering() {
        let snapshot = snapshot();
        let query = SearchQuery {
            sort: vec![SortSpec { field: "exclusions.{::0}.pct".into(), order: SortOrder::Desc }],
            ..SearchQuery::default()
        };
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        let sql = qb.into_sql();
        assert!(sql.contains(
            "(SELECT exclusions_heritable.pct FROM exclusions_heritable \
             WHERE exclusions_heritable.obj_id = f.obj_id \
             AND exclusions_heritable.pct IS NOT NULL LIMIT 1) DESC NULLS LAST"
        ));
    }

    #[test]
    fn nested_sort_ascending_puts_nulls_first() {
        let snapshot = snapshot();
        let query = SearchQuery {
            sort: vec![SortSpec {
                field: "exclusions.{excl_reason:3:0}.pct".into(),
                order: SortOrder::Asc,
            }],
            ..SearchQuery::default()
        };
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        let sql = qb.into_sql();
        assert!(sql.contains("AND exclusions_heritable.excl_reason = $2"));
        assert!(sql.contains("ASC NULLS FIRST"));
    }

    #[test]
    fn unknown_sort_field_is_rejected() {
        let snapshot = snapshot();
        let query = SearchQuery {
            sort: vec![SortSpec { field: "favourite_color".into(), order: SortOrder::Asc }],
            ..SearchQuery::default()
        };
        let err = SearchQueryBuilder::new(&snapshot, &query, 3).build().err().unwrap();
        assert!(matches!(err, StoreError::Search(_)));
    }

    #[test]
    fn organization_identity_sorts_are_allowed() {
        let snapshot = snapshot();
        let query = SearchQuery {
            sort: vec![SortSpec { field: "legal_name".into(), order: SortOrder::Asc }],
            ..SearchQuery::default()
        };
        let qb = SearchQueryBuilder::new(&snapshot, &query, 3).build().unwrap();
        assert!(qb.into_sql().contains("ORDER BY o.legal_name ASC"));
    }
}
