//! Field-level constraint rules and their validator.
//!
//! Rules are stored per column view as JSON (`constraint_value`): each rule
//! carries optional guard `conditions` and a list of `actions` whose `set`
//! block declares the actual bounds (`required`, `min`, `max`, `format`).
//! Violations are collected, not raised one at a time, so one response can
//! report every problem in a submission.

use crate::coerce::parse_datetime;
use crate::schema::{AttributeType, ColumnDef};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One constraint rule of a column view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintRule {
    #[serde(default)]
    pub conditions: Vec<JsonValue>,
    #[serde(default)]
    pub actions: Vec<ConstraintAction>,
}

/// One action of a constraint rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintAction {
    #[serde(default)]
    pub set: ActionSet,
}

/// The declared bounds of a constraint action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub min: Option<JsonValue>,
    #[serde(default)]
    pub max: Option<JsonValue>,
    #[serde(default)]
    pub format: Option<String>,
}

/// One field-level violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Violation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}': {}", self.field, self.message)
    }
}

/// Aggregated violations for one submission, reported all at once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    pub fn extend(&mut self, other: Violations) {
        self.0.extend(other.0);
    }
}

impl std::fmt::Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.0.len();
        write!(
            f,
            "{count} constraint violation{}: ",
            if count == 1 { "" } else { "s" }
        )?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Validates one field value against its column's declared rules.
pub struct ConstraintValidator;

impl ConstraintValidator {
    /// Validate `value` against every rule of the column's first view.
    /// Returns all violations found; an empty list means the value passes.
    pub fn validate(column: &ColumnDef, value: &JsonValue) -> Violations {
        let mut violations = Violations::default();
        let Some(view) = column.views.first() else {
            return violations;
        };
        for rule in &view.constraint_value {
            if !rule.conditions.is_empty() && !conditions_pass(&rule.conditions, value) {
                violations.push(Violation::new(
                    &column.name,
                    "value does not satisfy rule conditions",
                ));
            }
            for action in &rule.actions {
                Self::check_action(column, value, &action.set, &mut violations);
            }
        }
        violations
    }

    fn check_action(
        column: &ColumnDef,
        value: &JsonValue,
        set: &ActionSet,
        violations: &mut Violations,
    ) {
        if set.required == Some(true) && value_is_empty(value) {
            violations.push(Violation::new(&column.name, "required field is missing"));
        }
        match column.attribute_type {
            AttributeType::Int | AttributeType::Float => {
                Self::check_number(column, value, set, violations)
            }
            AttributeType::Text => Self::check_text(column, value, set, violations),
            AttributeType::Datetime => Self::check_datetime(column, value, set, violations),
            _ => {}
        }
    }

    fn check_number(
        column: &ColumnDef,
        value: &JsonValue,
        set: &ActionSet,
        violations: &mut Violations,
    ) {
        if value.is_null() || crate::value::NullState::is_sentinel(value) {
            return;
        }
        let Some(v) = value.as_f64() else {
            violations.push(Violation::new(
                &column.name,
                format!("invalid data type for comparison, must be a number: {value}"),
            ));
            return;
        };
        if let Some(min) = set.min.as_ref().and_then(JsonValue::as_f64) {
            if v < min {
                violations.push(Violation::new(
                    &column.name,
                    format!("value {v} is below the minimum of {min}"),
                ));
            }
        }
        if let Some(max) = set.max.as_ref().and_then(JsonValue::as_f64) {
            if v > max {
                violations.push(Violation::new(
                    &column.name,
                    format!("value {v} is above the maximum of {max}"),
                ));
            }
        }
    }

    fn check_text(
        column: &ColumnDef,
        value: &JsonValue,
        set: &ActionSet,
        violations: &mut Violations,
    ) {
        if value.is_null() || crate::value::NullState::is_sentinel(value) {
            return;
        }
        let Some(s) = value.as_str() else {
            violations.push(Violation::new(
                &column.name,
                format!("invalid data type for comparison, must be a string: {value}"),
            ));
            return;
        };
        let length = s.chars().count() as i64;
        if let Some(min) = set.min.as_ref().and_then(JsonValue::as_i64) {
            if length < min {
                violations.push(Violation::new(
                    &column.name,
                    format!("text length {length} is below the minimum of {min}"),
                ));
            }
        }
        if let Some(max) = set.max.as_ref().and_then(JsonValue::as_i64) {
            if length > max {
                violations.push(Violation::new(
                    &column.name,
                    format!("text length {length} is above the maximum of {max}"),
                ));
            }
        }
        if let Some(pattern) = &set.format {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        violations.push(Violation::new(
                            &column.name,
                            format!("value does not match format '{pattern}'"),
                        ));
                    }
                }
                Err(_) => violations.push(Violation::new(
                    &column.name,
                    format!("schema declares an invalid format '{pattern}'"),
                )),
            }
        }
    }

    fn check_datetime(
        column: &ColumnDef,
        value: &JsonValue,
        set: &ActionSet,
        violations: &mut Violations,
    ) {
        if value.is_null() || crate::value::NullState::is_sentinel(value) {
            return;
        }
        let Some(parsed) = value.as_str().and_then(parse_datetime) else {
            violations.push(Violation::new(
                &column.name,
                format!("{value} is not a valid datetime"),
            ));
            return;
        };
        for (bound, is_min) in [(&set.min, true), (&set.max, false)] {
            let Some(raw) = bound.as_ref().and_then(JsonValue::as_str) else {
                continue;
            };
            // "{currentDate}" resolves to the validation instant.
            let limit = if raw == "{currentDate}" {
                chrono::Utc::now()
            } else {
                match parse_datetime(raw) {
                    Some(dt) => dt,
                    None => continue,
                }
            };
            let ok = if is_min { parsed >= limit } else { parsed <= limit };
            if !ok {
                violations.push(Violation::new(
                    &column.name,
                    format!(
                        "datetime {} is {} the {} of {}",
                        parsed.to_rfc3339(),
                        if is_min { "before" } else { "after" },
                        if is_min { "minimum" } else { "maximum" },
                        limit.to_rfc3339()
                    ),
                ));
            }
        }
    }
}

/// Evaluate guard conditions: each condition JSON carries one comparison
/// operator somewhere in its structure; the guard passes if any condition
/// holds against the value.
fn conditions_pass(conditions: &[JsonValue], value: &JsonValue) -> bool {
    conditions.iter().any(|condition| {
        match find_comparison(condition) {
            Some((op, operand)) => compare(op, value, &operand),
            None => true,
        }
    })
}

/// Locate the first `lt`/`le`/`eq`/`ge`/`gt` operator in a condition tree.
fn find_comparison(condition: &JsonValue) -> Option<(&'static str, JsonValue)> {
    match condition {
        JsonValue::Object(map) => {
            for (key, value) in map {
                for op in ["lt", "le", "eq", "ge", "gt"] {
                    if key == op {
                        return Some((op, value.clone()));
                    }
                }
                if let Some(found) = find_comparison(value) {
                    return Some(found);
                }
            }
            None
        }
        JsonValue::Array(items) => items.iter().find_map(find_comparison),
        _ => None,
    }
}

fn compare(op: &str, value: &JsonValue, operand: &JsonValue) -> bool {
    if op == "eq" {
        return value == operand;
    }
    let (Some(v), Some(o)) = (value.as_f64(), operand.as_f64()) else {
        return false;
    };
    match op {
        "lt" => v < o,
        "le" => v <= o,
        "ge" => v >= o,
        "gt" => v > o,
        _ => false,
    }
}

fn value_is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}
