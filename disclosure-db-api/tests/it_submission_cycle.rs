//! Full flatten → reconstruct scenarios over an in-memory form storage.
//!
//! These tests exercise the core round-trip invariant of the engine
//! without a database: the flattener's write plan is materialized into a
//! `FormStorage` exactly as the fetch layer would produce it (sequential
//! row ids, heritable ordering), then reassembled.

use disclosure_db_api::{FormAssembler, NoUnits, SubmissionFlattener};
use disclosure_db_core::path::AttributePath;
use disclosure_db_core::value::{Cell, FormRow, FormStorage, WritePlan};
use disclosure_db_store::SchemaSnapshot;
use serde_json::{json, Value as JsonValue};

/// Materialize a write plan the way the fetch layer would hand it back:
/// sequential row ids in insertion order, heritable tables sorted by
/// `value_id DESC, id`.
fn plan_to_storage(plan: &WritePlan) -> FormStorage {
    let mut storage = FormStorage::new();
    let mut next_row_id = 1i64;
    let mut tables: std::collections::HashMap<String, Vec<FormRow>> = Default::default();
    for table_write in &plan.tables {
        for row_write in &table_write.rows {
            let mut row = FormRow::new();
            row.insert("id".into(), Cell::int(next_row_id));
            next_row_id += 1;
            for (name, cell) in row_write {
                row.insert(name.clone(), cell.clone());
            }
            tables.entry(table_write.table.clone()).or_default().push(row);
        }
    }
    for (table, mut rows) in tables {
        if table.ends_with("_heritable") {
            rows.sort_by_key(|row| {
                (
                    std::cmp::Reverse(row.get("value_id").and_then(Cell::as_int).unwrap_or(0)),
                    row.get("id").and_then(Cell::as_int).unwrap_or(0),
                )
            });
        }
        storage.insert_table(table, rows);
    }
    storage
}

fn snapshot() -> SchemaSnapshot {
    let root = serde_json::from_value(json!({
        "id": 1, "name": "disclosure_form", "heritable": false,
        "columns": [
            {"id": 10, "name": "total_emissions", "table_def_id": 1, "attribute_type": "float"},
            {"id": 11, "name": "disclosure_source", "table_def_id": 1, "attribute_type": "text"},
            {"id": 12, "name": "exclusions", "table_def_id": 1, "attribute_type": "form", "attribute_type_id": 2},
            {"id": 13, "name": "frameworks", "table_def_id": 1, "attribute_type": "multiple", "attribute_type_id": 3},
            {"id": 14, "name": "targets", "table_def_id": 1, "attribute_type": "form", "attribute_type_id": 4}
        ]
    }))
    .unwrap();
    let exclusions = serde_json::from_value(json!({
        "id": 2, "name": "exclusions", "heritable": true,
        "columns": [
            {"id": 20, "name": "pct", "table_def_id": 2, "attribute_type": "float"},
            {"id": 21, "name": "excl_reason", "table_def_id": 2, "attribute_type": "single", "choice_set_id": 5}
        ]
    }))
    .unwrap();
    let frameworks = serde_json::from_value(json!({
        "id": 3, "name": "frameworks", "heritable": true,
        "columns": [
            {"id": 30, "name": "frameworks_int", "table_def_id": 3, "attribute_type": "int"},
            {"id": 31, "name": "frameworks_text", "table_def_id": 3, "attribute_type": "text"}
        ]
    }))
    .unwrap();
    let targets = serde_json::from_value(json!({
        "id": 4, "name": "targets", "heritable": true,
        "columns": [
            {"id": 40, "name": "tgt_id", "table_def_id": 4, "attribute_type": "int"},
            {"id": 41, "name": "progress", "table_def_id": 4, "attribute_type": "form", "attribute_type_id": 6}
        ]
    }))
    .unwrap();
    let progress = serde_json::from_value(json!({
        "id": 6, "name": "progress", "heritable": true,
        "columns": [
            {"id": 60, "name": "pct_achieved", "table_def_id": 6, "attribute_type": "float"}
        ]
    }))
    .unwrap();
    SchemaSnapshot::from_definitions(
        "disclosure_form",
        vec![root, exclusions, frameworks, targets, progress],
        vec![],
        vec![],
        vec![],
    )
}

fn flatten_and_reconstruct(snapshot: &SchemaSnapshot, values: &JsonValue, obj_id: i64) -> JsonValue {
    let root = snapshot.table_def_by_name("disclosure_form").unwrap().clone();
    let plan = SubmissionFlattener::new(snapshot)
        .flatten(&root, obj_id, 1, values)
        .unwrap();
    let storage = plan_to_storage(&plan);
    let assembler = FormAssembler::new(snapshot, &storage, &NoUnits);
    let (reconstructed, _units) = assembler.assemble(&root).unwrap();
    reconstructed
}

#[test]
fn round_trip_preserves_nested_values() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}]
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);

    assert_eq!(tree["total_emissions"], json!(100.0));
    assert_eq!(tree["exclusions"][0]["pct"], json!(10.0));
    assert_eq!(tree["exclusions"][1]["pct"], json!(20.0));
}

#[test]
fn path_selects_second_exclusion_row() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}]
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);

    let path = AttributePath::parse("exclusions.{::1}.pct").unwrap();
    assert_eq!(path.resolve(&tree).unwrap(), &json!(20.0));
}

#[test]
fn multiple_values_round_trip_through_sub_rows() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "frameworks": [1000001, 1000002, "bespoke framework"]
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);

    assert_eq!(tree["frameworks"], json!([1000001, 1000002, "bespoke framework"]));
}

#[test]
fn sentinel_values_survive_the_round_trip() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": "N/A",
        "exclusions": "\u{2014}"
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);

    assert_eq!(tree["total_emissions"], json!("N/A"));
    assert_eq!(tree["exclusions"], json!("\u{2014}"));
}

#[test]
fn two_level_nesting_round_trips() {
    let snapshot = snapshot();
    let values = json!({
        "targets": [
            {"tgt_id": 1, "progress": [{"pct_achieved": 40.0}, {"pct_achieved": 60.0}]},
            {"tgt_id": 2, "progress": [{"pct_achieved": 80.0}]}
        ]
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);

    assert_eq!(tree["targets"][0]["tgt_id"], json!(1));
    assert_eq!(tree["targets"][0]["progress"][0]["pct_achieved"], json!(40.0));
    assert_eq!(tree["targets"][0]["progress"][1]["pct_achieved"], json!(60.0));
    assert_eq!(tree["targets"][1]["tgt_id"], json!(2));
    assert_eq!(tree["targets"][1]["progress"][0]["pct_achieved"], json!(80.0));

    let path = AttributePath::parse("targets.{tgt_id:2:0}.progress.{::0}.pct_achieved").unwrap();
    assert_eq!(path.resolve(&tree).unwrap(), &json!(80.0));
}

#[test]
fn sibling_occurrences_never_share_a_value_id() {
    let snapshot = snapshot();
    let root = snapshot.table_def_by_name("disclosure_form").unwrap().clone();
    let values = json!({
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}],
        "targets": [
            {"tgt_id": 1, "progress": [{"pct_achieved": 40.0}]},
            {"tgt_id": 2, "progress": [{"pct_achieved": 80.0}]}
        ]
    });
    let plan = SubmissionFlattener::new(&snapshot)
        .flatten(&root, 9, 1, &values)
        .unwrap();

    // Both target rows are siblings of one targets instance and share its
    // value_id; the progress instances they link must not collide.
    let target_rows: Vec<_> = plan
        .tables
        .iter()
        .filter(|t| t.table == "targets_heritable")
        .flat_map(|t| &t.rows)
        .collect();
    assert_eq!(target_rows.len(), 2);
    let progress_links: Vec<i64> = target_rows
        .iter()
        .map(|row| {
            row.iter()
                .find(|(n, _)| n == "progress")
                .and_then(|(_, c)| c.as_int())
                .unwrap()
        })
        .collect();
    assert_ne!(progress_links[0], progress_links[1]);

    // And every link allocated in this pass sits at or above the floor.
    assert!(progress_links.iter().all(|id| *id >= 1));
}

#[test]
fn reconstructed_tree_matches_itself_in_the_validator_diff() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}]
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);
    assert!(disclosure_db_api::validator::json_diff(&tree, &tree, "").is_empty());

    let mut drifted = tree.clone();
    drifted["total_emissions"] = json!(90.0);
    let differences = disclosure_db_api::validator::json_diff(&tree, &drifted, "");
    assert_eq!(differences.len(), 1);
    assert_eq!(differences[0].path, "total_emissions");
}

#[test]
fn restatement_edit_produces_next_revision_tree() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}]
    });
    // Revision 1.
    let revision1 = flatten_and_reconstruct(&snapshot, &values, 9);
    assert_eq!(revision1["exclusions"][0]["pct"], json!(10.0));

    // Apply the edit the way the revision manager does: strip identity
    // fields, resolve the path mutably, write the new value.
    let mut updated = disclosure_db_api::manager::strip_none(&revision1);
    let path = AttributePath::parse("exclusions.{::0}.pct").unwrap();
    *path.resolve_mut(&mut updated).unwrap() = json!(15.0);

    // Revision 2 is a full flatten of the updated tree under a new obj_id.
    let revision2 = flatten_and_reconstruct(&snapshot, &updated, 10);
    assert_eq!(revision2["exclusions"][0]["pct"], json!(15.0));
    assert_eq!(revision2["exclusions"][1]["pct"], json!(20.0));
    assert_eq!(revision2["total_emissions"], json!(100.0));

    // The same path string still addresses the restated leaf in the new
    // revision.
    assert_eq!(path.resolve(&revision2).unwrap(), &json!(15.0));
    assert_eq!(path.to_string(), "exclusions.{::0}.pct");
}

#[test]
fn round_trip_is_stable_after_strip() {
    // flatten(reconstruct(flatten(x))) == flatten(x) modulo identity
    // fields: the second pass sees the reconstructed tree (which carries
    // id/obj_id/value_id keys) and must produce the same business cells.
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": [{"pct": 10.0}, {"pct": 20.0}],
        "frameworks": [1000001]
    });
    let first = flatten_and_reconstruct(&snapshot, &values, 9);
    let second = flatten_and_reconstruct(&snapshot, &disclosure_db_api::manager::strip_none(&first), 10);

    let normalize = |tree: &JsonValue| disclosure_db_api::manager::strip_none(tree);
    assert_eq!(normalize(&first), normalize(&second));
}

#[test]
fn null_sub_form_value_materializes_an_empty_occurrence() {
    let snapshot = snapshot();
    let values = json!({
        "total_emissions": 100.0,
        "exclusions": null
    });
    let tree = flatten_and_reconstruct(&snapshot, &values, 9);
    // A null sub-form still records the occurrence: one child row with no
    // business cells.
    let rows = tree["exclusions"].as_array().expect("one empty occurrence");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["pct"], json!(null));
    assert_eq!(tree["total_emissions"], json!(100.0));
}

#[test]
fn unknown_fields_are_rejected_with_their_name() {
    let snapshot = snapshot();
    let root = snapshot.table_def_by_name("disclosure_form").unwrap().clone();
    let err = SubmissionFlattener::new(&snapshot)
        .flatten(&root, 9, 1, &json!({"mystery_field": 1}))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("mystery_field"), "got: {message}");
}
