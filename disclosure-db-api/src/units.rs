//! Unit resolution boundary.
//!
//! Unit formatting (currency/measurement display per field) is an external
//! collaborator: the assembler computes a units tree in parallel with the
//! values tree, but defers every actual unit decision to this trait. The
//! default [`NoUnits`] resolver yields no units, which keeps the core
//! engine independent of unit-catalog policy.

use disclosure_db_core::schema::ColumnDef;
use disclosure_db_core::value::FormRow;
use serde_json::Value as JsonValue;

/// Resolves the display unit of one field, given the field's current row
/// and its parent row (when inside a sub-form).
pub trait UnitResolver: Send + Sync {
    fn resolve_unit(
        &self,
        column: &ColumnDef,
        row: &FormRow,
        parent: Option<&FormRow>,
    ) -> Option<JsonValue>;
}

/// A resolver that knows no units.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUnits;

impl UnitResolver for NoUnits {
    fn resolve_unit(
        &self,
        _column: &ColumnDef,
        _row: &FormRow,
        _parent: Option<&FormRow>,
    ) -> Option<JsonValue> {
        None
    }
}
