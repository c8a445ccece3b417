//! # Disclosure DB Core
//!
//! I/O-free core library for the Disclosure DB submission engine.
//!
//! This crate provides:
//! - The dynamic schema model: `TableDef`, `ColumnDef`, choice sets, prompts
//! - The cell/value model with explicit null-sentinel states
//! - The attribute path language used to address one field inside an
//!   arbitrarily nested submission
//! - Type coercion, multiple/form conversion and constraint validation
//!
//! ## Design Principles
//!
//! 1. **No I/O**: this crate never talks to a database or a runtime. The
//!    store layer fills a [`FormStorage`] with fetched rows; everything here
//!    operates on that in-memory view.
//! 2. **Closed enums, exhaustive matches**: `AttributeType`, `CellValue` and
//!    `NullState` are closed tagged variants dispatched by `match`, so new
//!    kinds cannot be added without the compiler flagging every branch.
//! 3. **Schema order drives iteration**: map types never decide output
//!    ordering; the declared column order of a `TableDef` does.

pub mod coerce;
pub mod constraint;
pub mod convert;
pub mod error;
pub mod path;
pub mod prompt;
pub mod schema;
pub mod value;

pub use coerce::{cell_from_json, CoercionError};
pub use constraint::{ConstraintAction, ConstraintRule, ConstraintValidator, Violation, Violations};
pub use error::{CoreError, Result};
pub use path::{AttributePath, ChoiceSegment};
pub use schema::{
    AttributePrompt, AttributeType, Choice, ColumnDef, ColumnView, Organization, RuleEffect,
    TableDef, TableView,
};
pub use value::{
    is_id_field, Cell, CellValue, FormRow, FormStorage, NullState, RowWrite, TableWrite,
    WritePlan, ID_FIELDS,
};
