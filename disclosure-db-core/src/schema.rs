//! Dynamic form schema model.
//!
//! Form definitions live in the database, not in code: a [`TableDef`] per
//! (sub-)form, a [`ColumnDef`] per field, choice sets for single/multiple
//! fields and prompts for display text. The store layer loads these into an
//! immutable registry snapshot; everything else reads the snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Supported attribute types. Closed: coercion and recursion dispatch on
/// this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Label,
    Text,
    Bool,
    Int,
    Float,
    Datetime,
    Single,
    Multiple,
    Form,
    FormOrNull,
    File,
}

impl AttributeType {
    /// Attribute types that reference a nested form and recurse during
    /// flattening/reconstruction.
    pub fn is_recursive(&self) -> bool {
        matches!(
            self,
            AttributeType::Form | AttributeType::FormOrNull | AttributeType::Multiple
        )
    }

    /// Parse the storage representation (snake_case, as persisted in the
    /// column definition table).
    pub fn parse(s: &str) -> Option<AttributeType> {
        serde_json::from_value(JsonValue::String(s.to_string())).ok()
    }

    /// The storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Label => "label",
            AttributeType::Text => "text",
            AttributeType::Bool => "bool",
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::Datetime => "datetime",
            AttributeType::Single => "single",
            AttributeType::Multiple => "multiple",
            AttributeType::Form => "form",
            AttributeType::FormOrNull => "form_or_null",
            AttributeType::File => "file",
        }
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form definition: one per (sub-)form, with its ordered field definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Heritable forms may have multiple rows per parent occurrence and
    /// carry a `value_id` grouping column.
    #[serde(default)]
    pub heritable: bool,
    /// Field definitions in schema order (ordered by column id).
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Physical table name: heritable forms get a `_heritable` suffix.
    pub fn physical_name(&self) -> String {
        if self.heritable {
            format!("{}_heritable", self.name)
        } else {
            self.name.clone()
        }
    }

    /// Find a column by field name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: i64,
    pub name: String,
    pub table_def_id: i64,
    pub attribute_type: AttributeType,
    /// For Form/FormOrNull/Multiple: the id of the referenced nested
    /// `TableDef`.
    #[serde(default)]
    pub attribute_type_id: Option<i64>,
    /// For Single/Multiple: the choice set backing this field.
    #[serde(default)]
    pub choice_set_id: Option<i64>,
    #[serde(default)]
    pub prompts: Vec<AttributePrompt>,
    #[serde(default)]
    pub views: Vec<ColumnView>,
}

impl ColumnDef {
    /// The field's primary prompt, if any.
    pub fn prompt(&self) -> Option<&AttributePrompt> {
        self.prompts.first()
    }

    /// The `required` flag declared by this column's first view constraint,
    /// if the view declares one.
    ///
    /// Mirrors the shape `constraint_value[0].actions[0].set.required`.
    pub fn required_constraint_value(&self) -> Option<bool> {
        let view = self.views.first()?;
        let rule = view.constraint_value.first()?;
        let action = rule.actions.first()?;
        action.set.required
    }

    /// The first view's rendering rules, parsed lazily.
    pub fn constraint_view(&self) -> Option<ConstraintViewModel> {
        let raw = self.views.first()?.constraint_view.as_ref()?;
        serde_json::from_value(raw.clone()).ok()
    }
}

/// One entry of a choice set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    /// Stable identifier referenced by stored cell values.
    pub choice_id: i64,
    pub set_id: i64,
    pub set_name: String,
    pub value: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub language_code: Option<String>,
}

/// Human-readable label template for a field. May contain a `{tag}`
/// placeholder resolved from a sibling choice field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributePrompt {
    pub id: i64,
    pub column_def_id: i64,
    pub value: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Per-view field configuration: validation rules (`constraint_value`) and
/// rendering rules (`constraint_view`, kept as raw JSON and parsed on
/// demand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub id: i64,
    pub column_def_id: i64,
    #[serde(default)]
    pub constraint_value: Vec<crate::constraint::ConstraintRule>,
    #[serde(default)]
    pub constraint_view: Option<JsonValue>,
}

/// Published schema revision a submission is submitted against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableView {
    pub id: i64,
    pub table_def_id: i64,
    pub name: String,
    pub revision: i64,
    #[serde(default)]
    pub active: bool,
}

/// Owning entity of submissions; joined by search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub nz_id: i64,
    pub lei: String,
    pub legal_name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub sics_sector: Option<String>,
    #[serde(default)]
    pub sics_sub_sector: Option<String>,
    #[serde(default)]
    pub sics_industry: Option<String>,
}

/// Effect of a conditional show/hide rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleEffect {
    Show,
    Hide,
}

/// Condition of a show/hide rule: a sibling field name compared against a
/// constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub name: String,
    #[serde(default)]
    pub schema: ConditionSchema,
}

/// The comparison constant of a rule condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionSchema {
    #[serde(rename = "const", default)]
    pub constant: Option<JsonValue>,
}

/// Show/hide rule of a rendering constraint view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowRule {
    pub effect: RuleEffect,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
}

/// Tag metadata carried by a form column's rendering view: which sibling
/// field names the tag, and which choice id means "other".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagItemProps {
    #[serde(default)]
    pub name_attribute_single: Option<String>,
    #[serde(default)]
    pub other_choice_id: Option<i64>,
}

/// Item section of a rendering constraint view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemView {
    #[serde(default)]
    pub additional_props: TagItemProps,
}

/// Parsed rendering rules of a column view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintViewModel {
    #[serde(default)]
    pub rule: Option<ShowRule>,
    #[serde(default)]
    pub item: Option<ItemView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_type_round_trip() {
        for ty in [
            AttributeType::Bool,
            AttributeType::Text,
            AttributeType::Int,
            AttributeType::Float,
            AttributeType::Datetime,
            AttributeType::Single,
            AttributeType::Multiple,
            AttributeType::Form,
            AttributeType::FormOrNull,
        ] {
            assert_eq!(AttributeType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(AttributeType::parse("form_or_null"), Some(AttributeType::FormOrNull));
        assert_eq!(AttributeType::parse("geometry"), None);
    }

    #[test]
    fn recursive_types() {
        assert!(AttributeType::Form.is_recursive());
        assert!(AttributeType::FormOrNull.is_recursive());
        assert!(AttributeType::Multiple.is_recursive());
        assert!(!AttributeType::Single.is_recursive());
        assert!(!AttributeType::Int.is_recursive());
    }

    #[test]
    fn physical_name_suffixes_heritable() {
        let td = TableDef {
            id: 1,
            name: "exclusions".into(),
            description: None,
            heritable: true,
            columns: vec![],
        };
        assert_eq!(td.physical_name(), "exclusions_heritable");

        let td = TableDef { heritable: false, ..td };
        assert_eq!(td.physical_name(), "exclusions");
    }

    #[test]
    fn required_constraint_extraction() {
        let col: ColumnDef = serde_json::from_value(json!({
            "id": 10,
            "name": "total_emissions",
            "table_def_id": 1,
            "attribute_type": "float",
            "views": [{
                "id": 1,
                "column_def_id": 10,
                "constraint_value": [{"actions": [{"set": {"required": true}}]}]
            }]
        }))
        .unwrap();
        assert_eq!(col.required_constraint_value(), Some(true));

        let col: ColumnDef = serde_json::from_value(json!({
            "id": 11,
            "name": "notes",
            "table_def_id": 1,
            "attribute_type": "text",
            "views": [{"id": 2, "column_def_id": 11, "constraint_value": []}]
        }))
        .unwrap();
        assert_eq!(col.required_constraint_value(), None);
    }

    #[test]
    fn constraint_view_parses_rule_and_tag_props() {
        let col: ColumnDef = serde_json::from_value(json!({
            "id": 12,
            "name": "tgt_progress",
            "table_def_id": 1,
            "attribute_type": "form",
            "attribute_type_id": 5,
            "views": [{
                "id": 3,
                "column_def_id": 12,
                "constraint_view": {
                    "rule": {
                        "effect": "SHOW",
                        "conditions": [{"name": "tgt_coverage", "schema": {"const": 2}}]
                    },
                    "item": {
                        "additional_props": {
                            "name_attribute_single": "tgt_type",
                            "other_choice_id": 1000042
                        }
                    }
                }
            }]
        }))
        .unwrap();
        let view = col.constraint_view().unwrap();
        let rule = view.rule.unwrap();
        assert_eq!(rule.effect, RuleEffect::Show);
        assert_eq!(rule.conditions[0].name, "tgt_coverage");
        assert_eq!(rule.conditions[0].schema.constant, Some(json!(2)));
        let item = view.item.unwrap();
        assert_eq!(item.additional_props.name_attribute_single.as_deref(), Some("tgt_type"));
        assert_eq!(item.additional_props.other_choice_id, Some(1000042));
    }
}
