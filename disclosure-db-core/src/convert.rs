//! Conversion between the "multiple" wire format and its sub-form rows.
//!
//! A multiple-choice field is transported as a flat list of choice ids and
//! free-text entries, but persisted through the same heritable sub-form
//! mechanics as nested forms: each item becomes a row with an `{attr}_int`
//! and an `{attr}_text` column. Free-text entries are marked by
//! `{attr}_int = -1`.

use crate::error::{CoreError, Result};
use serde_json::{Map, Value as JsonValue};

/// Convert a flat multiple-choice list into sub-form row objects for
/// insertion into the field's heritable table.
///
/// Integer items become `{attr}_int: v, {attr}_text: ""`; non-empty
/// non-integer items become `{attr}_int: -1, {attr}_text: <string>`.
/// Empty/null items are dropped.
pub fn multiple_to_form(values: &[JsonValue], attr_name: &str) -> Vec<JsonValue> {
    let int_key = format!("{attr_name}_int");
    let text_key = format!("{attr_name}_text");
    let mut rows = Vec::new();
    for value in values {
        if let Some(v) = value.as_i64() {
            let mut row = Map::new();
            row.insert(int_key.clone(), JsonValue::from(v));
            row.insert(text_key.clone(), JsonValue::String(String::new()));
            rows.push(JsonValue::Object(row));
        } else if let Some(s) = value.as_str() {
            if !s.is_empty() {
                let mut row = Map::new();
                row.insert(int_key.clone(), JsonValue::from(-1));
                row.insert(text_key.clone(), JsonValue::String(s.to_string()));
                rows.push(JsonValue::Object(row));
            }
        } else if !value.is_null() {
            let mut row = Map::new();
            row.insert(int_key.clone(), JsonValue::from(-1));
            row.insert(text_key.clone(), JsonValue::String(value.to_string()));
            rows.push(JsonValue::Object(row));
        }
    }
    rows
}

/// Convert reconstructed sub-form rows back into the flat multiple-choice
/// list for the response body.
///
/// The `-1` int marker and empty texts are dropped. Row identity columns
/// and prompt entries are ignored; any other field name is a structural
/// error.
pub fn form_to_multiple(rows: &[JsonValue], attr_name: &str) -> Result<Vec<JsonValue>> {
    let int_key = format!("{attr_name}_int");
    let text_key = format!("{attr_name}_text");
    let mut values = Vec::new();
    for row in rows {
        let obj = row.as_object().ok_or_else(|| {
            CoreError::conversion(format!("expected row object for multiple '{attr_name}'"))
        })?;
        for (field, value) in obj {
            if field == &int_key {
                if let Some(v) = value.as_i64() {
                    if v != -1 {
                        values.push(JsonValue::from(v));
                    }
                }
            } else if field == &text_key {
                if let Some(s) = value.as_str() {
                    if !s.is_empty() {
                        values.push(JsonValue::String(s.to_string()));
                    }
                }
            } else if field == "id"
                || field == "obj_id"
                || field == "value_id"
                || field == "prompt"
                || field.ends_with("_prompt")
            {
                continue;
            } else {
                return Err(CoreError::conversion(format!(
                    "unexpected field name '{field}' in multiple '{attr_name}'"
                )));
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multiple_to_form_pairs_ints_and_text() {
        let rows = multiple_to_form(&[json!(1000001), json!("Other framework")], "frameworks");
        assert_eq!(
            rows,
            vec![
                json!({"frameworks_int": 1000001, "frameworks_text": ""}),
                json!({"frameworks_int": -1, "frameworks_text": "Other framework"}),
            ]
        );
    }

    #[test]
    fn multiple_to_form_drops_empty_items() {
        let rows = multiple_to_form(&[json!(""), json!(null)], "frameworks");
        assert!(rows.is_empty());
    }

    #[test]
    fn form_to_multiple_inverts_the_pairing() {
        let rows = vec![
            json!({"id": 4, "obj_id": 9, "value_id": 2, "frameworks_int": 1000001, "frameworks_text": ""}),
            json!({"id": 5, "obj_id": 9, "value_id": 2, "frameworks_int": -1, "frameworks_text": "Other framework"}),
        ];
        let values = form_to_multiple(&rows, "frameworks").unwrap();
        assert_eq!(values, vec![json!(1000001), json!("Other framework")]);
    }

    #[test]
    fn round_trip_through_form_rows() {
        let input = vec![json!(1000001), json!(1000002), json!("custom")];
        let rows = multiple_to_form(&input, "frameworks");
        let output = form_to_multiple(&rows, "frameworks").unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn unexpected_field_is_an_error() {
        let rows = vec![json!({"frameworks_int": 1, "surprise": 2})];
        assert!(form_to_multiple(&rows, "frameworks").is_err());
    }
}
