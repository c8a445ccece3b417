//! Search execution and hit hydration.
//!
//! The store builds the SQL; this service runs it, hydrates each hit from
//! the aggregate cache (falling back to concurrent full reconstructions
//! only for cache misses), merges the search row's organization fields
//! into the values, and optionally strips the values down to requested
//! attribute paths.

use crate::error::Result;
use crate::loader::SubmissionLoader;
use disclosure_db_core::path::AttributePath;
use disclosure_db_store::search::{run_count, run_search, SearchHit, SearchQuery, SearchQueryBuilder};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use tracing::debug;

/// A search response page.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub total: i64,
    pub total_companies: i64,
    pub items: Vec<JsonValue>,
}

/// Runs search queries and hydrates their hits.
#[derive(Clone)]
pub struct SearchService {
    loader: SubmissionLoader,
}

impl SearchService {
    pub fn new(loader: SubmissionLoader) -> Self {
        SearchService { loader }
    }

    pub async fn search(
        &self,
        query: &SearchQuery,
        table_view_id: i64,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<SearchResults> {
        let pool = self.loader.pool().clone();
        let snapshot = self.loader.registry().snapshot();

        let builder = SearchQueryBuilder::new(&snapshot, query, table_view_id)
            .limit(limit)
            .offset(offset);
        let hits = run_search(&pool, builder.build()?).await?;

        let count_builder = SearchQueryBuilder::new(&snapshot, query, table_view_id);
        let total = run_count(&pool, count_builder.build_count()?).await?;
        let company_builder = SearchQueryBuilder::new(&snapshot, query, table_view_id);
        let total_companies = run_count(&pool, company_builder.build_company_count()?).await?;

        let values_by_id = self.hydrate(&hits).await?;

        let paths = query
            .fields
            .iter()
            .map(|f| AttributePath::parse(f))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(hits.len());
        for hit in &hits {
            let Some(values) = values_by_id.get(&hit.obj_id) else {
                continue;
            };
            let mut values = if paths.is_empty() {
                strip_null_fields(values)
            } else {
                strip_to_fields(values, &paths)
            };
            merge_hit_fields(&mut values, hit);
            items.push(values);
        }

        Ok(SearchResults {
            total,
            total_companies,
            items,
        })
    }

    /// Values per hit: aggregate documents first, concurrent full loads
    /// for the misses.
    async fn hydrate(&self, hits: &[SearchHit]) -> Result<HashMap<i64, JsonValue>> {
        let ids: Vec<i64> = hits.iter().map(|h| h.obj_id).collect();
        let aggregates =
            disclosure_db_store::aggregate::load_many(self.loader.pool(), &ids).await?;
        let mut values_by_id: HashMap<i64, JsonValue> = aggregates
            .into_iter()
            .map(|(id, data)| {
                let values = data.get("values").cloned().unwrap_or(JsonValue::Null);
                (id, values)
            })
            .collect();

        let misses: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !values_by_id.contains_key(id))
            .collect();
        if !misses.is_empty() {
            debug!(misses = misses.len(), "aggregate misses during search hydration");
            let loads = misses.iter().map(|id| self.loader.load(*id, false, false));
            for view in try_join_all(loads).await? {
                values_by_id.insert(view.id, view.values);
            }
        }
        Ok(values_by_id)
    }
}

/// Merge the base-row organization and meta fields into a hit's values.
fn merge_hit_fields(values: &mut JsonValue, hit: &SearchHit) {
    let JsonValue::Object(map) = values else {
        return;
    };
    map.insert("id".into(), JsonValue::from(hit.obj_id));
    map.insert("legal_name".into(), JsonValue::String(hit.legal_name.clone()));
    map.insert("lei".into(), JsonValue::String(hit.lei.clone()));
    map.insert("nz_id".into(), JsonValue::from(hit.nz_id));
    for (key, value) in [
        ("jurisdiction", hit.jurisdiction.clone().map(JsonValue::String)),
        ("data_model", hit.data_model.clone().map(JsonValue::String)),
        ("sics_sector", hit.sics_sector.clone().map(JsonValue::String)),
        ("sics_sub_sector", hit.sics_sub_sector.clone().map(JsonValue::String)),
        ("sics_industry", hit.sics_industry.clone().map(JsonValue::String)),
    ] {
        if let Some(value) = value {
            map.insert(key.into(), value);
        }
    }
    if let Some(year) = hit.reporting_year {
        map.insert("reporting_year".into(), JsonValue::from(year));
    }
}

/// Strip nulls and row identity from a full values tree.
fn strip_null_fields(values: &JsonValue) -> JsonValue {
    crate::manager::strip_none(values)
}

/// Reduce a values tree to the requested attribute paths. Each kept
/// sub-form row carries the addressed attribute plus the choice field that
/// selected it.
fn strip_to_fields(values: &JsonValue, paths: &[AttributePath]) -> JsonValue {
    let mut out = Map::new();
    for path in paths {
        let Ok(leaf) = path.resolve(values) else {
            continue;
        };
        match &path.form {
            None => {
                out.insert(path.attribute.clone(), leaf.clone());
            }
            Some(_) => {
                insert_path_value(&mut out, path, leaf.clone());
            }
        }
    }
    JsonValue::Object(out)
}

/// Build the nested `{form: [{...}]}` shell for one resolved path.
fn insert_path_value(out: &mut Map<String, JsonValue>, path: &AttributePath, leaf: JsonValue) {
    let Some(form) = &path.form else {
        out.insert(path.attribute.clone(), leaf);
        return;
    };
    let mut row = Map::new();
    match &path.sub_path {
        Some(sub) => insert_path_value(&mut row, sub, leaf),
        None => {
            row.insert(path.attribute.clone(), leaf);
        }
    }
    if let (Some(field), Some(value)) = (&path.choice.field, path.choice.value) {
        row.insert(field.clone(), JsonValue::from(value));
    }
    let rows = out
        .entry(form.clone())
        .or_insert_with(|| JsonValue::Array(Vec::new()));
    if let JsonValue::Array(rows) = rows {
        rows.push(JsonValue::Object(row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_to_fields_keeps_addressed_leaves_with_choice_context() {
        let values = json!({
            "total_emissions": 100.0,
            "notes": "long text",
            "exclusions": [
                {"pct": 10.0, "excl_reason": 3},
                {"pct": 20.0, "excl_reason": 5}
            ]
        });
        let paths = vec![
            AttributePath::parse("total_emissions").unwrap(),
            AttributePath::parse("exclusions.{excl_reason:5:0}.pct").unwrap(),
        ];
        let stripped = strip_to_fields(&values, &paths);
        assert_eq!(stripped["total_emissions"], json!(100.0));
        assert_eq!(stripped["exclusions"], json!([{"pct": 20.0, "excl_reason": 5}]));
        assert!(stripped.get("notes").is_none());
    }

    #[test]
    fn unresolvable_paths_are_skipped() {
        let values = json!({"total_emissions": 100.0});
        let paths = vec![AttributePath::parse("absent.{::0}.pct").unwrap()];
        let stripped = strip_to_fields(&values, &paths);
        assert_eq!(stripped, json!({}));
    }
}
