//! Reassembly of one submission's nested value tree from its flat rows.
//!
//! The assembler is pure: it consumes a [`FormStorage`] (filled by the
//! store's batched fetch) and a schema snapshot, and produces the `values`
//! tree and its parallel `units` tree. Recursion follows the schema:
//! Form/FormOrNull cells link to child rows grouped by `value_id`,
//! Multiple cells do the same and then re-encode the child rows into the
//! flat choice list. Prompt text with `{tag}` placeholders is resolved
//! against the current row or, failing that, by crawling parent rows.

use crate::error::{ApiError, Result};
use crate::units::UnitResolver;
use disclosure_db_core::convert;
use disclosure_db_core::prompt;
use disclosure_db_core::schema::{AttributeType, ColumnDef, RuleEffect, TableDef};
use disclosure_db_core::value::{Cell, FormRow, FormStorage};
use disclosure_db_store::SchemaSnapshot;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Rebuilds nested (values, units) trees from fetched rows.
pub struct FormAssembler<'a> {
    snapshot: &'a SchemaSnapshot,
    storage: &'a FormStorage,
    units: &'a dyn UnitResolver,
}

impl<'a> FormAssembler<'a> {
    pub fn new(
        snapshot: &'a SchemaSnapshot,
        storage: &'a FormStorage,
        units: &'a dyn UnitResolver,
    ) -> Self {
        FormAssembler {
            snapshot,
            storage,
            units,
        }
    }

    /// Assemble the root form. Non-heritable roots have one row per
    /// submission; the result is that row's tree (empty object when the
    /// submission holds no rows).
    pub fn assemble(&self, root: &TableDef) -> Result<(JsonValue, JsonValue)> {
        let (mut rows, mut unit_rows) = self.form_values(root, None, &[])?;
        let values = if rows.is_empty() {
            JsonValue::Object(Map::new())
        } else {
            rows.swap_remove(0)
        };
        let units = if unit_rows.is_empty() {
            JsonValue::Object(Map::new())
        } else {
            unit_rows.swap_remove(0)
        };
        Ok((values, units))
    }

    /// Assemble every row of one form level: the rows of `td` grouped under
    /// `value_id`. `parents` is the stack of ancestor rows, nearest last.
    fn form_values(
        &self,
        td: &TableDef,
        value_id: Option<i64>,
        parents: &[&FormRow],
    ) -> Result<(Vec<JsonValue>, Vec<JsonValue>)> {
        let table = td.physical_name();
        let mut rows_out = Vec::new();
        let mut units_out = Vec::new();

        for row in self.storage.rows(&table, value_id) {
            let mut values = Map::new();
            let mut units = Map::new();

            for id_field in ["id", "obj_id"] {
                if let Some(cell) = row.get(id_field) {
                    values.insert(id_field.to_string(), cell.to_json());
                }
            }
            if td.heritable {
                if let Some(cell) = row.get("value_id") {
                    values.insert("value_id".to_string(), cell.to_json());
                }
            }

            for column in &td.columns {
                let cell = row.get(&column.name);
                let (value, unit) = self.field_value(column, cell, row, parents)?;
                values.insert(column.name.clone(), value);
                units.insert(column.name.clone(), unit);
                self.apply_prompt(column, row, parents, &mut values);
            }

            rows_out.push(JsonValue::Object(values));
            units_out.push(JsonValue::Object(units));
        }
        Ok((rows_out, units_out))
    }

    /// Resolve one field of one row per its attribute type.
    fn field_value(
        &self,
        column: &ColumnDef,
        cell: Option<&Cell>,
        row: &FormRow,
        parents: &[&FormRow],
    ) -> Result<(JsonValue, JsonValue)> {
        let Some(cell) = cell else {
            return Ok((JsonValue::Null, JsonValue::Null));
        };
        match column.attribute_type {
            AttributeType::Bool
            | AttributeType::Text
            | AttributeType::Int
            | AttributeType::Float
            | AttributeType::Datetime
            | AttributeType::Single
            | AttributeType::Label
            | AttributeType::File => {
                let unit = self
                    .units
                    .resolve_unit(column, row, parents.last().copied())
                    .unwrap_or(JsonValue::Null);
                Ok((cell.to_json(), unit))
            }
            AttributeType::Form | AttributeType::FormOrNull => {
                self.sub_form_value(column, cell, row, parents)
            }
            AttributeType::Multiple => {
                let (value, _) = self.sub_form_value(column, cell, row, parents)?;
                let value = match value {
                    JsonValue::Array(rows) => {
                        JsonValue::Array(convert::form_to_multiple(&rows, &column.name)?)
                    }
                    other => other,
                };
                // One unit for the whole multiple-choice list, not one per
                // child row.
                let unit = self
                    .units
                    .resolve_unit(column, row, parents.last().copied())
                    .unwrap_or(JsonValue::Null);
                Ok((value, unit))
            }
        }
    }

    /// Recurse into the sub-form a Form/FormOrNull/Multiple cell links to.
    fn sub_form_value(
        &self,
        column: &ColumnDef,
        cell: &Cell,
        row: &FormRow,
        parents: &[&FormRow],
    ) -> Result<(JsonValue, JsonValue)> {
        // A sentinel on the link cell means the whole sub-form was
        // intentionally withheld; surface the sentinel, do not recurse.
        if cell.state.is_some() {
            return Ok((cell.to_json(), JsonValue::Null));
        }
        let Some(link) = cell.as_int() else {
            return Ok((JsonValue::Null, JsonValue::Null));
        };
        let sub_td = self.snapshot.sub_table_def(column).ok_or_else(|| {
            ApiError::not_found(format!(
                "table definition referenced by column '{}'",
                column.name
            ))
        })?;

        let mut chain: Vec<&FormRow> = parents.to_vec();
        chain.push(row);
        let (rows, unit_rows) = self.form_values(sub_td, Some(link), &chain)?;
        if rows.is_empty() {
            return Ok((JsonValue::Null, JsonValue::Null));
        }
        Ok((JsonValue::Array(rows), JsonValue::Array(unit_rows)))
    }

    /// Resolve the field's prompt into `{field}_prompt`, interpolating a
    /// `{tag}` placeholder when present.
    fn apply_prompt(
        &self,
        column: &ColumnDef,
        row: &FormRow,
        parents: &[&FormRow],
        values: &mut Map<String, JsonValue>,
    ) {
        let Some(field_prompt) = column.prompt() else {
            return;
        };
        let prompt_key = format!("{}_prompt", column.name);
        let Some(tag) = prompt::tag_key(&field_prompt.value) else {
            values.insert(prompt_key, JsonValue::String(field_prompt.value.clone()));
            return;
        };

        let tag_value = values
            .get(tag)
            .and_then(JsonValue::as_i64)
            .or_else(|| row.get(tag).and_then(Cell::as_int))
            .or_else(|| crawl_parents(parents, tag));
        let Some(tag_value) = tag_value else {
            debug!(field = %column.name, tag, "no tag value found for prompt");
            return;
        };

        let Some(tag_column) = self.snapshot.column_def(tag) else {
            return;
        };
        let choices = self.snapshot.column_choices(tag_column);
        let Some(choice) = choices.iter().find(|c| c.choice_id == tag_value) else {
            return;
        };

        // The tag's owning table declares, on its form column, which choice
        // id counts as "other".
        let other_choice_id = self
            .snapshot
            .owning_table_def(tag_column)
            .and_then(|td| {
                td.columns.iter().find_map(|col| {
                    if col.attribute_type != AttributeType::Form {
                        return None;
                    }
                    let view = col.constraint_view()?;
                    let props = view.item?.additional_props;
                    if props.name_attribute_single.as_deref() == Some(tag) {
                        props.other_choice_id
                    } else {
                        None
                    }
                })
            });

        let mapped = if other_choice_id == Some(choice.id) {
            "other"
        } else {
            choice.value.as_str()
        };

        if self.prompt_shown(column, values) {
            values.insert(
                prompt_key,
                JsonValue::String(prompt::interpolate(&field_prompt.value, tag, mapped)),
            );
        }
    }

    /// Evaluate the field's show/hide rule against the current row. Fields
    /// without a rule, or whose rule names an absent sibling, are shown.
    fn prompt_shown(&self, column: &ColumnDef, values: &Map<String, JsonValue>) -> bool {
        let Some(rule) = column.constraint_view().and_then(|v| v.rule) else {
            return true;
        };
        let Some(condition) = rule.conditions.first() else {
            return true;
        };
        let Some(actual) = values.get(&condition.name) else {
            return true;
        };
        let matches = Some(actual) == condition.schema.constant.as_ref();
        match rule.effect {
            RuleEffect::Show => matches,
            RuleEffect::Hide => !matches,
        }
    }
}

/// Walk ancestor rows, nearest first, for a tag value.
fn crawl_parents(parents: &[&FormRow], tag: &str) -> Option<i64> {
    parents
        .iter()
        .rev()
        .find_map(|row| row.get(tag).and_then(Cell::as_int))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::NoUnits;
    use disclosure_db_core::schema::{Choice, TableDef};
    use disclosure_db_core::value::CellValue;
    use serde_json::json;

    fn cell(v: i64) -> Cell {
        Cell::int(v)
    }

    fn float_cell(v: f64) -> Cell {
        Cell::new(CellValue::Float(v))
    }

    fn snapshot() -> SchemaSnapshot {
        let root: TableDef = serde_json::from_value(json!({
            "id": 1, "name": "disclosure_form", "heritable": false,
            "columns": [
                {"id": 10, "name": "total_emissions", "table_def_id": 1, "attribute_type": "float"},
                {"id": 11, "name": "exclusions", "table_def_id": 1, "attribute_type": "form", "attribute_type_id": 2},
                {"id": 12, "name": "frameworks", "table_def_id": 1, "attribute_type": "multiple", "attribute_type_id": 3}
            ]
        }))
        .unwrap();
        let exclusions: TableDef = serde_json::from_value(json!({
            "id": 2, "name": "exclusions", "heritable": true,
            "columns": [
                {"id": 20, "name": "pct", "table_def_id": 2, "attribute_type": "float"}
            ]
        }))
        .unwrap();
        let frameworks: TableDef = serde_json::from_value(json!({
            "id": 3, "name": "frameworks", "heritable": true,
            "columns": [
                {"id": 30, "name": "frameworks_int", "table_def_id": 3, "attribute_type": "int"},
                {"id": 31, "name": "frameworks_text", "table_def_id": 3, "attribute_type": "text"}
            ]
        }))
        .unwrap();
        SchemaSnapshot::from_definitions(
            "disclosure_form",
            vec![root, exclusions, frameworks],
            vec![],
            vec![],
            vec![],
        )
    }

    fn storage() -> FormStorage {
        let mut storage = FormStorage::new();

        let mut root = FormRow::new();
        root.insert("id".into(), cell(1));
        root.insert("obj_id".into(), cell(9));
        root.insert("total_emissions".into(), float_cell(100.0));
        root.insert("exclusions".into(), cell(5));
        root.insert("frameworks".into(), cell(6));
        storage.insert_table("disclosure_form", vec![root]);

        let mut ex_a = FormRow::new();
        ex_a.insert("id".into(), cell(11));
        ex_a.insert("obj_id".into(), cell(9));
        ex_a.insert("value_id".into(), cell(5));
        ex_a.insert("pct".into(), float_cell(10.0));
        let mut ex_b = FormRow::new();
        ex_b.insert("id".into(), cell(12));
        ex_b.insert("obj_id".into(), cell(9));
        ex_b.insert("value_id".into(), cell(5));
        ex_b.insert("pct".into(), float_cell(20.0));
        storage.insert_table("exclusions_heritable", vec![ex_a, ex_b]);

        let mut fw = FormRow::new();
        fw.insert("id".into(), cell(21));
        fw.insert("obj_id".into(), cell(9));
        fw.insert("value_id".into(), cell(6));
        fw.insert("frameworks_int".into(), cell(1000001));
        fw.insert("frameworks_text".into(), Cell::new(CellValue::Text(String::new())));
        storage.insert_table("frameworks_heritable", vec![fw]);

        storage
    }

    #[test]
    fn assembles_nested_tree_in_row_order() {
        let snapshot = snapshot();
        let storage = storage();
        let assembler = FormAssembler::new(&snapshot, &storage, &NoUnits);
        let root = snapshot.table_def_by_name("disclosure_form").unwrap();
        let (values, _units) = assembler.assemble(root).unwrap();

        assert_eq!(values["total_emissions"], json!(100.0));
        assert_eq!(values["exclusions"][0]["pct"], json!(10.0));
        assert_eq!(values["exclusions"][1]["pct"], json!(20.0));
    }

    #[test]
    fn multiple_field_re_encodes_to_flat_list() {
        let snapshot = snapshot();
        let storage = storage();
        let assembler = FormAssembler::new(&snapshot, &storage, &NoUnits);
        let root = snapshot.table_def_by_name("disclosure_form").unwrap();
        let (values, _units) = assembler.assemble(root).unwrap();

        assert_eq!(values["frameworks"], json!([1000001]));
    }

    #[test]
    fn absent_sub_rows_yield_null() {
        let snapshot = snapshot();
        let mut storage = storage();
        storage.insert_table("exclusions_heritable", vec![]);
        let assembler = FormAssembler::new(&snapshot, &storage, &NoUnits);
        let root = snapshot.table_def_by_name("disclosure_form").unwrap();
        let (values, _units) = assembler.assemble(root).unwrap();

        assert_eq!(values["exclusions"], json!(null));
    }

    #[test]
    fn sentinel_link_cell_surfaces_without_recursion() {
        let snapshot = snapshot();
        let mut storage = storage();
        let mut root = storage.rows("disclosure_form", None)[0].clone();
        root.insert(
            "exclusions".into(),
            Cell::sentinel(disclosure_db_core::NullState::NotApplicable),
        );
        storage.insert_table("disclosure_form", vec![root]);
        let assembler = FormAssembler::new(&snapshot, &storage, &NoUnits);
        let root = snapshot.table_def_by_name("disclosure_form").unwrap();
        let (values, _units) = assembler.assemble(root).unwrap();

        assert_eq!(values["exclusions"], json!("N/A"));
    }

    #[test]
    fn tag_prompt_resolves_from_parent_rows() {
        // Root form with a choice field `tgt_type`, whose sub-form carries
        // a prompt tagged `{tgt_type}`.
        let root: TableDef = serde_json::from_value(json!({
            "id": 1, "name": "disclosure_form", "heritable": false,
            "columns": [
                {"id": 10, "name": "tgt_type", "table_def_id": 1, "attribute_type": "single", "choice_set_id": 7},
                {
                    "id": 11, "name": "progress", "table_def_id": 1,
                    "attribute_type": "form", "attribute_type_id": 2,
                    "views": [{
                        "id": 1, "column_def_id": 11,
                        "constraint_view": {"item": {"additional_props": {
                            "name_attribute_single": "tgt_type", "other_choice_id": 99
                        }}}
                    }]
                }
            ]
        }))
        .unwrap();
        let progress: TableDef = serde_json::from_value(json!({
            "id": 2, "name": "progress", "heritable": true,
            "columns": [{
                "id": 20, "name": "pct_achieved", "table_def_id": 2, "attribute_type": "float",
                "prompts": [{"id": 1, "column_def_id": 20, "value": "Progress toward {tgt_type} target"}]
            }]
        }))
        .unwrap();
        let choices = vec![Choice {
            id: 70,
            choice_id: 1000001,
            set_id: 7,
            set_name: "target_types".into(),
            value: "absolute".into(),
            order: None,
            language_code: None,
        }];
        let snapshot = SchemaSnapshot::from_definitions(
            "disclosure_form",
            vec![root, progress],
            choices,
            vec![],
            vec![],
        );

        let mut storage = FormStorage::new();
        let mut root_row = FormRow::new();
        root_row.insert("id".into(), cell(1));
        root_row.insert("obj_id".into(), cell(9));
        root_row.insert("tgt_type".into(), cell(1000001));
        root_row.insert("progress".into(), cell(3));
        storage.insert_table("disclosure_form", vec![root_row]);
        let mut sub_row = FormRow::new();
        sub_row.insert("id".into(), cell(5));
        sub_row.insert("obj_id".into(), cell(9));
        sub_row.insert("value_id".into(), cell(3));
        sub_row.insert("pct_achieved".into(), float_cell(40.0));
        storage.insert_table("progress_heritable", vec![sub_row]);

        let assembler = FormAssembler::new(&snapshot, &storage, &NoUnits);
        let root = snapshot.table_def_by_name("disclosure_form").unwrap();
        let (values, _units) = assembler.assemble(root).unwrap();

        assert_eq!(
            values["progress"][0]["pct_achieved_prompt"],
            json!("Progress toward absolute target")
        );
    }
}
