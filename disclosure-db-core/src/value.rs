//! Cell and value model with explicit null-sentinel states.
//!
//! Every nullable business field is persisted as two physical columns: the
//! typed value column and a `{name}_state` text companion. The pair is
//! surfaced here as a [`Cell`], which distinguishes "value present",
//! "intentionally left blank" (a [`NullState`] sentinel) and plain NULL.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Column names that carry row identity rather than business data.
pub const ID_FIELDS: [&str; 3] = ["id", "obj_id", "value_id"];

/// Returns true for `id`, `obj_id` and `value_id`.
pub fn is_id_field(name: &str) -> bool {
    ID_FIELDS.contains(&name)
}

/// Null-sentinel states: "value intentionally withheld", as distinct from
/// "value never collected" (plain NULL with no state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullState {
    /// "-"
    Dash,
    /// "—"
    LongDash,
    /// "N/A"
    NotApplicable,
}

impl NullState {
    /// The wire/storage representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            NullState::Dash => "-",
            NullState::LongDash => "\u{2014}",
            NullState::NotApplicable => "N/A",
        }
    }

    /// Parse a storage string back into a state.
    pub fn parse(s: &str) -> Option<NullState> {
        match s {
            "-" => Some(NullState::Dash),
            "\u{2014}" => Some(NullState::LongDash),
            "N/A" => Some(NullState::NotApplicable),
            _ => None,
        }
    }

    /// Check whether a JSON value is one of the sentinel strings.
    pub fn from_json(value: &JsonValue) -> Option<NullState> {
        value.as_str().and_then(NullState::parse)
    }

    /// True when the JSON value is a sentinel string.
    pub fn is_sentinel(value: &JsonValue) -> bool {
        NullState::from_json(value).is_some()
    }
}

impl std::fmt::Display for NullState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical scalar cell contents, typed per the declared attribute type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// SQL NULL
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// The integer content, if any. Used for `id`/`obj_id`/`value_id` and
    /// for the form-id cells that link a parent row to its sub-form rows.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON representation. Timestamps render as RFC 3339.
    pub fn to_json(&self) -> JsonValue {
        match self {
            CellValue::Null => JsonValue::Null,
            CellValue::Bool(v) => JsonValue::Bool(*v),
            CellValue::Int(v) => JsonValue::from(*v),
            CellValue::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number)
            }
            CellValue::Text(v) => JsonValue::String(v.clone()),
            CellValue::Timestamp(v) => {
                JsonValue::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// One physical cell: the stored value plus its null-sentinel state.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub state: Option<NullState>,
}

impl Cell {
    /// A plain value cell with no sentinel state.
    pub fn new(value: CellValue) -> Self {
        Cell { value, state: None }
    }

    /// An integer cell. Convenience for id fields and form links.
    pub fn int(value: i64) -> Self {
        Cell::new(CellValue::Int(value))
    }

    /// A sentinel cell: NULL value plus an explicit state.
    pub fn sentinel(state: NullState) -> Self {
        Cell {
            value: CellValue::Null,
            state: Some(state),
        }
    }

    /// The integer content, ignoring any sentinel state.
    pub fn as_int(&self) -> Option<i64> {
        self.value.as_int()
    }

    /// JSON representation: the sentinel string when a state is set,
    /// otherwise the value itself.
    pub fn to_json(&self) -> JsonValue {
        match self.state {
            Some(state) => JsonValue::String(state.as_str().to_string()),
            None => self.value.to_json(),
        }
    }
}

/// One fetched row of a physical form table.
pub type FormRow = HashMap<String, Cell>;

/// One row prepared for insertion, cells in encounter order.
pub type RowWrite = Vec<(String, Cell)>;

/// Insert-ready rows for one physical table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableWrite {
    pub table: String,
    pub rows: Vec<RowWrite>,
}

/// The full output of flattening one submission: one [`TableWrite`] per
/// (sub-)form that received rows, in allocation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub tables: Vec<TableWrite>,
}

impl WritePlan {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// The rows destined for one table, if any.
    pub fn table(&self, table: &str) -> Option<&TableWrite> {
        self.tables.iter().find(|t| t.table == table)
    }
}

/// All fetched rows for one submission, keyed by physical table name.
///
/// This is the seam between the store (which fills it with one query per
/// table) and the assembler (which only reads it). Row order inside each
/// table is the order produced by the fetch queries and must be preserved.
#[derive(Debug, Default, Clone)]
pub struct FormStorage {
    tables: HashMap<String, Vec<FormRow>>,
}

impl FormStorage {
    pub fn new() -> Self {
        FormStorage::default()
    }

    /// Install the fetched rows for one physical table.
    pub fn insert_table(&mut self, table: impl Into<String>, rows: Vec<FormRow>) {
        self.tables.insert(table.into(), rows);
    }

    /// All rows of a table, in fetch order.
    pub fn table(&self, table: &str) -> &[FormRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows of a table grouped under one parent occurrence.
    ///
    /// `value_id == None` selects root rows (no `value_id` cell, or NULL);
    /// `Some(id)` selects the rows of the sub-form instance linked from a
    /// parent cell holding `id`.
    pub fn rows(&self, table: &str, value_id: Option<i64>) -> Vec<&FormRow> {
        self.table(table)
            .iter()
            .filter(|row| row.get("value_id").and_then(Cell::as_int) == value_id)
            .collect()
    }

    /// Table names present in this storage.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_state_round_trip() {
        for state in [NullState::Dash, NullState::LongDash, NullState::NotApplicable] {
            assert_eq!(NullState::parse(state.as_str()), Some(state));
        }
        assert_eq!(NullState::parse("n/a"), None);
    }

    #[test]
    fn sentinel_detection() {
        assert!(NullState::is_sentinel(&json!("N/A")));
        assert!(NullState::is_sentinel(&json!("\u{2014}")));
        assert!(!NullState::is_sentinel(&json!("NA")));
        assert!(!NullState::is_sentinel(&json!(null)));
        assert!(!NullState::is_sentinel(&json!(12)));
    }

    #[test]
    fn sentinel_cell_renders_state_string() {
        let cell = Cell::sentinel(NullState::NotApplicable);
        assert_eq!(cell.to_json(), json!("N/A"));

        let cell = Cell::new(CellValue::Int(42));
        assert_eq!(cell.to_json(), json!(42));
    }

    #[test]
    fn storage_groups_rows_by_value_id() {
        let mut storage = FormStorage::new();
        let mut root = FormRow::new();
        root.insert("id".into(), Cell::int(1));
        let mut child_a = FormRow::new();
        child_a.insert("id".into(), Cell::int(2));
        child_a.insert("value_id".into(), Cell::int(7));
        let mut child_b = FormRow::new();
        child_b.insert("id".into(), Cell::int(3));
        child_b.insert("value_id".into(), Cell::int(8));

        storage.insert_table("emissions", vec![root]);
        storage.insert_table("exclusions_heritable", vec![child_a, child_b]);

        assert_eq!(storage.rows("emissions", None).len(), 1);
        assert_eq!(storage.rows("exclusions_heritable", Some(7)).len(), 1);
        assert_eq!(storage.rows("exclusions_heritable", Some(9)).len(), 0);
        assert_eq!(storage.rows("missing_table", None).len(), 0);
    }
}
