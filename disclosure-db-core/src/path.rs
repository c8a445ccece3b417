//! Attribute path language.
//!
//! A path addresses one leaf field inside a nested submission tree:
//!
//! ```text
//! <form>.{<choice_field>:<choice_value>:<index>}.<attribute>
//! ```
//!
//! The `<form>.{...}` prefix repeats for deeper nesting; `<index>`
//! disambiguates among repeated sibling rows (optionally after filtering by
//! a choice field/value pair). `"exclusions.{::1}.pct"` selects the `pct`
//! field of the second `exclusions` row; a bare `"total_emissions"`
//! addresses a root-level field.
//!
//! Parsing and [`std::fmt::Display`] are exact inverses for all valid
//! inputs. Resolution against a value tree is deterministic and fails with
//! [`CoreError::PathResolution`] when the addressed form, row or attribute
//! does not exist.

use crate::error::{CoreError, Result};
use serde_json::Value as JsonValue;

/// Row disambiguation inside one form level: filter sibling rows by
/// `field == value` (when set) and select the `index`-th match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChoiceSegment {
    pub field: Option<String>,
    pub value: Option<i64>,
    pub index: usize,
}

impl ChoiceSegment {
    /// Plain positional selection with no choice filter.
    pub fn index(index: usize) -> Self {
        ChoiceSegment {
            field: None,
            value: None,
            index,
        }
    }

}

impl std::fmt::Display for ChoiceSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.field.as_deref().unwrap_or(""),
            self.value.map(|v| v.to_string()).unwrap_or_default(),
            self.index
        )
    }
}

/// One level of a parsed attribute path. `sub_path` chains outer-to-inner;
/// the node with no `sub_path` is the leaf, where `attribute` applies.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePath {
    pub form: Option<String>,
    pub choice: ChoiceSegment,
    /// Physical row id, resolved lazily against the database by the
    /// restatement subsystem. Never supplied by callers.
    pub row_id: i64,
    pub attribute: String,
    pub sub_path: Option<Box<AttributePath>>,
}

impl AttributePath {
    /// A root-level path addressing `attribute` directly.
    pub fn root(attribute: impl Into<String>) -> Self {
        AttributePath {
            form: None,
            choice: ChoiceSegment::default(),
            row_id: 0,
            attribute: attribute.into(),
            sub_path: None,
        }
    }

    /// Parse a dotted path string.
    ///
    /// The final segment is the attribute; the preceding segments are
    /// consumed from the end backwards in `(form, {choice})` pairs, building
    /// the chain inner-to-outer and re-attaching as `sub_path` pointers from
    /// outer to inner.
    pub fn parse(input: &str) -> Result<AttributePath> {
        let mut segments: Vec<&str> = input.split('.').collect();
        let attribute = segments.pop().filter(|s| !s.is_empty()).ok_or_else(|| {
            CoreError::path_format(format!("empty attribute in path '{input}'"))
        })?;

        if segments.is_empty() {
            return Ok(AttributePath::root(attribute));
        }
        if segments.len() % 2 != 0 {
            return Err(CoreError::path_format(format!(
                "dangling form segment in path '{input}'"
            )));
        }

        let mut sub_path: Option<Box<AttributePath>> = None;
        let mut i = segments.len();
        while i >= 2 {
            let form = segments[i - 2];
            let choice = parse_choice_segment(segments[i - 1], input)?;
            sub_path = Some(Box::new(AttributePath {
                form: Some(form.to_string()),
                choice,
                row_id: 0,
                attribute: attribute.to_string(),
                sub_path,
            }));
            i -= 2;
        }

        // The loop built inner-first; the last node constructed is the
        // outermost and owns the whole chain.
        Ok(*sub_path.expect("at least one pair was parsed"))
    }

    /// The innermost node of the chain, where `attribute` applies.
    pub fn leaf(&self) -> &AttributePath {
        match &self.sub_path {
            Some(sub) => sub.leaf(),
            None => self,
        }
    }

    /// Mutable access to the innermost node.
    pub fn leaf_mut(&mut self) -> &mut AttributePath {
        if self.sub_path.is_some() {
            return self.sub_path.as_mut().unwrap().leaf_mut();
        }
        self
    }

    /// Resolve this path against a value tree, returning the addressed leaf.
    pub fn resolve<'a>(&self, tree: &'a JsonValue) -> Result<&'a JsonValue> {
        match &self.form {
            None => tree.get(&self.attribute).ok_or_else(|| {
                CoreError::path_resolution(format!("attribute '{}' not present", self.attribute))
            }),
            Some(form) => {
                let rows = form_rows(tree, form)?;
                let index = self.row_index(rows, form)?;
                let row = &rows[index];
                match &self.sub_path {
                    Some(sub) => sub.resolve(row),
                    None => row.get(&self.attribute).ok_or_else(|| {
                        CoreError::path_resolution(format!(
                            "attribute '{}' not present in form '{form}'",
                            self.attribute
                        ))
                    }),
                }
            }
        }
    }

    /// Resolve this path against a mutable tree, returning the addressed
    /// leaf for in-place update.
    pub fn resolve_mut<'a>(&self, tree: &'a mut JsonValue) -> Result<&'a mut JsonValue> {
        match &self.form {
            None => {
                let attribute = self.attribute.clone();
                tree.get_mut(&attribute).ok_or_else(|| {
                    CoreError::path_resolution(format!("attribute '{attribute}' not present"))
                })
            }
            Some(form) => {
                // Index computed against the shared view first so the
                // mutable borrow stays linear.
                let index = {
                    let rows = form_rows(tree, form)?;
                    self.row_index(rows, form)?
                };
                let form_name = form.clone();
                let row = tree
                    .get_mut(&form_name)
                    .and_then(|v| v.as_array_mut())
                    .and_then(|rows| rows.get_mut(index))
                    .ok_or_else(|| {
                        CoreError::path_resolution(format!("form '{form_name}' not present"))
                    })?;
                match &self.sub_path {
                    Some(sub) => sub.resolve_mut(row),
                    None => {
                        let attribute = self.attribute.clone();
                        row.get_mut(&attribute).ok_or_else(|| {
                            CoreError::path_resolution(format!(
                                "attribute '{attribute}' not present in form '{form_name}'"
                            ))
                        })
                    }
                }
            }
        }
    }

    /// Select the row index within `rows` per the choice segment: filter by
    /// `field == value` when a choice value is set, else plain positional
    /// selection.
    fn row_index(&self, rows: &[JsonValue], form: &str) -> Result<usize> {
        match (&self.choice.field, self.choice.value) {
            (Some(field), Some(value)) => {
                let matching: Vec<usize> = rows
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| {
                        row.get(field).and_then(JsonValue::as_i64) == Some(value)
                    })
                    .map(|(i, _)| i)
                    .collect();
                matching.get(self.choice.index).copied().ok_or_else(|| {
                    CoreError::path_resolution(format!(
                        "form '{form}' only has {} rows with value '{value}' on field '{field}'",
                        matching.len()
                    ))
                })
            }
            _ => {
                if self.choice.index < rows.len() {
                    Ok(self.choice.index)
                } else {
                    Err(CoreError::path_resolution(format!(
                        "form '{form}' does not contain index {}",
                        self.choice.index
                    )))
                }
            }
        }
    }
}

fn form_rows<'a>(tree: &'a JsonValue, form: &str) -> Result<&'a Vec<JsonValue>> {
    let value = tree
        .get(form)
        .ok_or_else(|| CoreError::path_resolution(format!("form '{form}' not present")))?;
    if value.is_null() {
        return Err(CoreError::path_resolution(format!(
            "no record for form '{form}'"
        )));
    }
    value.as_array().ok_or_else(|| {
        CoreError::path_resolution(format!("form '{form}' is not a repeated form"))
    })
}

fn parse_choice_segment(segment: &str, input: &str) -> Result<ChoiceSegment> {
    let inner = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| {
            CoreError::path_format(format!("expected '{{field:value:index}}' in path '{input}'"))
        })?;
    let parts: Vec<&str> = inner.split(':').collect();
    if parts.len() != 3 {
        return Err(CoreError::path_format(format!(
            "wrong choice segment '{{{inner}}}' in path '{input}'"
        )));
    }
    let (field, value, index) = (parts[0], parts[1], parts[2]);
    // A choice value always needs its field name, and the index is
    // mandatory.
    if (!value.is_empty() && field.is_empty()) || index.is_empty() {
        return Err(CoreError::path_format(format!(
            "malformed choice segment '{{{inner}}}' in path '{input}'"
        )));
    }
    let index: usize = index.parse().map_err(|_| {
        CoreError::path_format(format!("non-numeric index in path '{input}'"))
    })?;
    if field.is_empty() && value.is_empty() {
        return Ok(ChoiceSegment::index(index));
    }
    let value: Option<i64> = if value.is_empty() {
        None
    } else {
        Some(value.parse().map_err(|_| {
            CoreError::path_format(format!("non-numeric choice value in path '{input}'"))
        })?)
    };
    Ok(ChoiceSegment {
        field: Some(field.to_string()),
        value,
        index,
    })
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.form {
            Some(form) => {
                write!(f, "{form}.{{{}}}", self.choice)?;
                match &self.sub_path {
                    Some(sub) => write!(f, ".{sub}"),
                    None => write!(f, ".{}", self.attribute),
                }
            }
            None => f.write_str(&self.attribute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> JsonValue {
        json!({
            "total_emissions": 100.0,
            "exclusions": [
                {"pct": 10, "excl_reason": 3},
                {"pct": 20, "excl_reason": 3},
                {"pct": 30, "excl_reason": 5}
            ],
            "targets": [
                {"tgt_id": 1, "progress": [{"year": 2022, "pct_achieved": 40.0}]}
            ]
        })
    }

    #[test]
    fn parse_root_level_attribute() {
        let path = AttributePath::parse("total_emissions").unwrap();
        assert_eq!(path.form, None);
        assert_eq!(path.attribute, "total_emissions");
        assert!(path.sub_path.is_none());
    }

    #[test]
    fn parse_single_level() {
        let path = AttributePath::parse("exclusions.{::1}.pct").unwrap();
        assert_eq!(path.form.as_deref(), Some("exclusions"));
        assert_eq!(path.choice, ChoiceSegment::index(1));
        assert_eq!(path.attribute, "pct");
        assert!(path.sub_path.is_none());
    }

    #[test]
    fn parse_choice_filter() {
        let path = AttributePath::parse("exclusions.{excl_reason:3:1}.pct").unwrap();
        assert_eq!(path.choice.field.as_deref(), Some("excl_reason"));
        assert_eq!(path.choice.value, Some(3));
        assert_eq!(path.choice.index, 1);
    }

    #[test]
    fn parse_nested_chain() {
        let path = AttributePath::parse("targets.{tgt_id:1:0}.progress.{::0}.pct_achieved").unwrap();
        assert_eq!(path.form.as_deref(), Some("targets"));
        let sub = path.sub_path.as_ref().unwrap();
        assert_eq!(sub.form.as_deref(), Some("progress"));
        assert!(sub.sub_path.is_none());
        assert_eq!(sub.attribute, "pct_achieved");
        assert_eq!(path.leaf().attribute, "pct_achieved");
    }

    #[test]
    fn display_round_trips() {
        for s in [
            "total_emissions",
            "exclusions.{::1}.pct",
            "exclusions.{excl_reason:3:0}.pct",
            "targets.{tgt_id:1:0}.progress.{::0}.pct_achieved",
            "a.{x:9:2}.b.{y:8:1}.c.{::0}.leaf",
        ] {
            let path = AttributePath::parse(s).unwrap();
            assert_eq!(path.to_string(), s, "round trip failed for '{s}'");
        }
    }

    #[test]
    fn malformed_paths_fail_at_parse_time() {
        for s in [
            "exclusions.{:3:1}.pct",  // choice value without field
            "exclusions.{::}.pct",    // missing index
            "exclusions.{:}.pct",     // wrong arity
            "exclusions.{a:b}.pct",   // wrong arity
            "exclusions.{::x}.pct",   // non-numeric index
            "orphan.exclusions.{::0}.pct", // dangling form segment
            "",
        ] {
            assert!(
                matches!(AttributePath::parse(s), Err(CoreError::PathFormat(_))),
                "expected PathFormat for '{s}'"
            );
        }
    }

    #[test]
    fn resolve_by_index() {
        let tree = tree();
        let path = AttributePath::parse("exclusions.{::1}.pct").unwrap();
        assert_eq!(path.resolve(&tree).unwrap(), &json!(20));
    }

    #[test]
    fn resolve_by_choice_filter() {
        let tree = tree();
        // Second row with excl_reason == 3 is overall index 1.
        let path = AttributePath::parse("exclusions.{excl_reason:3:1}.pct").unwrap();
        assert_eq!(path.resolve(&tree).unwrap(), &json!(20));
        let path = AttributePath::parse("exclusions.{excl_reason:5:0}.pct").unwrap();
        assert_eq!(path.resolve(&tree).unwrap(), &json!(30));
    }

    #[test]
    fn resolve_nested() {
        let tree = tree();
        let path = AttributePath::parse("targets.{tgt_id:1:0}.progress.{::0}.pct_achieved").unwrap();
        assert_eq!(path.resolve(&tree).unwrap(), &json!(40.0));
    }

    #[test]
    fn resolve_out_of_range_index() {
        let tree = tree();
        let path = AttributePath::parse("exclusions.{::7}.pct").unwrap();
        assert!(matches!(path.resolve(&tree), Err(CoreError::PathResolution(_))));
        // Deterministic: same error kind on repeat.
        assert!(matches!(path.resolve(&tree), Err(CoreError::PathResolution(_))));
    }

    #[test]
    fn resolve_absent_form() {
        let tree = tree();
        let path = AttributePath::parse("inclusions.{::0}.pct").unwrap();
        assert!(matches!(path.resolve(&tree), Err(CoreError::PathResolution(_))));
    }

    #[test]
    fn resolve_choice_with_too_few_matches() {
        let tree = tree();
        let path = AttributePath::parse("exclusions.{excl_reason:5:1}.pct").unwrap();
        assert!(matches!(path.resolve(&tree), Err(CoreError::PathResolution(_))));
    }

    #[test]
    fn resolve_mut_updates_in_place() {
        let mut tree = tree();
        let path = AttributePath::parse("exclusions.{::0}.pct").unwrap();
        *path.resolve_mut(&mut tree).unwrap() = json!(15);
        assert_eq!(tree["exclusions"][0]["pct"], json!(15));
        assert_eq!(tree["exclusions"][1]["pct"], json!(20));
    }

    #[test]
    fn resolve_root_attribute() {
        let tree = tree();
        let path = AttributePath::parse("total_emissions").unwrap();
        assert_eq!(path.resolve(&tree).unwrap(), &json!(100.0));
    }
}
