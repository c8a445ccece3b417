//! Decomposition of a nested value tree into insert-ready rows.
//!
//! The walk is recursive, depth-first, in the order fields arrive: one
//! current row per form level; encountering a field that is already present
//! in the current row starts a new sibling occurrence. Sub-form ids are
//! allocated from a single running counter seeded strictly above the
//! current maximum in the database, so sibling occurrences never share a
//! `value_id`. Constraint violations are collected across the whole walk
//! and reported together, with the required-field check deferred to the
//! end of the pass.

use crate::error::{ApiError, Result};
use disclosure_db_core::coerce::cell_from_json;
use disclosure_db_core::constraint::{ConstraintValidator, Violation, Violations};
use disclosure_db_core::convert;
use disclosure_db_core::schema::{AttributeType, TableDef};
use disclosure_db_core::value::{is_id_field, Cell, NullState, RowWrite, TableWrite, WritePlan};
use disclosure_db_store::SchemaSnapshot;
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Flattens one submission tree into a [`WritePlan`].
pub struct SubmissionFlattener<'a> {
    snapshot: &'a SchemaSnapshot,
    violations: Violations,
    /// Names of schema-required fields that appeared in this submission.
    required_seen: HashSet<String>,
}

impl<'a> SubmissionFlattener<'a> {
    pub fn new(snapshot: &'a SchemaSnapshot) -> Self {
        SubmissionFlattener {
            snapshot,
            violations: Violations::default(),
            required_seen: HashSet::new(),
        }
    }

    /// Flatten `values` for insertion under `obj_id`, allocating sub-form
    /// ids starting at `start_form_id` (one above the observed maximum).
    ///
    /// Every violation found during the walk — type mismatches, bound
    /// violations, missing required fields — is reported together in a
    /// single `Validation` error.
    pub fn flatten(
        mut self,
        root: &TableDef,
        obj_id: i64,
        start_form_id: i64,
        values: &JsonValue,
    ) -> Result<WritePlan> {
        let mut plan = WritePlan::default();
        let value_list = [values.clone()];
        self.walk(root, obj_id, start_form_id, &value_list, &mut plan)?;
        self.verify_required_fields();
        if !self.violations.is_empty() {
            return Err(ApiError::Core(
                disclosure_db_core::CoreError::Validation(self.violations),
            ));
        }
        Ok(plan)
    }

    /// Walk one form level. `form_id` is this level's `value_id` when the
    /// table is heritable, and the floor of the allocation counter.
    /// Returns the latest allocated form id.
    fn walk(
        &mut self,
        td: &TableDef,
        obj_id: i64,
        form_id: i64,
        values: &[JsonValue],
        plan: &mut WritePlan,
    ) -> Result<i64> {
        let mut rows: Vec<RowWrite> = Vec::new();
        let mut row = self.new_row(td, obj_id, form_id);
        let mut next_id = form_id;

        for value in values {
            // An absent sub-form occurrence still materializes an empty row
            // so the occurrence itself is recorded.
            let empty = serde_json::Map::new();
            let object = match value {
                JsonValue::Null => &empty,
                JsonValue::Object(map) => map,
                other => {
                    self.violations.push(Violation::new(
                        &td.name,
                        format!("bad type: expected object, found: {other}"),
                    ));
                    continue;
                }
            };

            for (field, v) in object {
                if is_id_field(field) || field.ends_with("_prompt") {
                    continue;
                }
                let Some(column) = self.snapshot.column_def(field).cloned() else {
                    self.violations
                        .push(Violation::new(field, "unknown field in submission"));
                    continue;
                };
                if column.required_constraint_value().is_some() {
                    self.required_seen.insert(field.clone());
                }

                // A repeated field starts a new sibling occurrence.
                if row.iter().any(|(name, _)| name == field) {
                    rows.push(std::mem::replace(
                        &mut row,
                        self.new_row(td, obj_id, form_id),
                    ));
                }

                self.violations
                    .extend(ConstraintValidator::validate(&column, v));

                if column.attribute_type.is_recursive() {
                    if let Some(state) = NullState::from_json(v) {
                        row.push((field.clone(), Cell::sentinel(state)));
                        continue;
                    }
                    let Some(sub_td) = self.snapshot.sub_table_def(&column).cloned() else {
                        self.violations.push(Violation::new(
                            field,
                            "form column references no table definition",
                        ));
                        continue;
                    };
                    let this_form_id = next_id;
                    row.push((field.clone(), Cell::int(this_form_id)));

                    let mut sub_values: Vec<JsonValue> = match v {
                        JsonValue::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    if column.attribute_type == AttributeType::Multiple
                        && sub_values.first().map(|x| !x.is_object()).unwrap_or(false)
                    {
                        sub_values = convert::multiple_to_form(&sub_values, field);
                    }
                    let latest =
                        self.walk(&sub_td, obj_id, this_form_id, &sub_values, plan)?;
                    next_id = latest + 1;
                } else {
                    match cell_from_json(column.attribute_type, v) {
                        Ok(cell) => row.push((field.clone(), cell)),
                        Err(e) => self
                            .violations
                            .push(Violation::new(field, e.to_string())),
                    }
                }
            }
        }
        rows.push(row);

        plan.tables.push(TableWrite {
            table: td.physical_name(),
            rows,
        });
        Ok(next_id)
    }

    fn new_row(&self, td: &TableDef, obj_id: i64, form_id: i64) -> RowWrite {
        let mut row: RowWrite = vec![("obj_id".to_string(), Cell::int(obj_id))];
        if td.heritable {
            row.push(("value_id".to_string(), Cell::int(form_id)));
        }
        row
    }

    /// Every schema-required field must have appeared somewhere in the
    /// submission. Conditional show/hide branching is deliberately not
    /// consulted: a field the schema declares required is always required.
    fn verify_required_fields(&mut self) {
        let mut missing: Vec<String> = Vec::new();
        for td in self.snapshot_table_defs() {
            for column in &td.columns {
                if column.required_constraint_value() == Some(true)
                    && !self.required_seen.contains(&column.name)
                {
                    missing.push(column.name.clone());
                }
            }
        }
        missing.sort_unstable();
        for name in missing {
            self.violations
                .push(Violation::new(name, "required field is missing"));
        }
    }

    fn snapshot_table_defs(&self) -> Vec<std::sync::Arc<TableDef>> {
        // Required fields are checked across the whole submission schema,
        // not only the branches the input happened to touch.
        let mut out = Vec::new();
        if let Ok(root) = self.snapshot.root_table_def() {
            out.push(root.clone());
            out.extend(self.snapshot.collect_sub_table_defs(root));
        }
        out
    }
}
