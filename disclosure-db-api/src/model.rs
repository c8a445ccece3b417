//! Request/response models of the submission API.

use chrono::{DateTime, Utc};
use disclosure_db_store::SubmissionRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A fully loaded submission: the record plus its materialized `values`
/// and `units` trees. This is also the document persisted whole into the
/// aggregate cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionView {
    pub id: i64,
    pub table_view_id: i64,
    pub name: String,
    pub revision: i64,
    pub active: bool,
    pub activated_on: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub checked_out: bool,
    pub checked_out_on: Option<DateTime<Utc>>,
    pub permissions_set_id: Option<i64>,
    pub submitted_by: i64,
    pub data_source: Option<String>,
    pub status: Option<String>,
    pub lei: Option<String>,
    pub nz_id: i64,
    #[serde(default)]
    pub values: JsonValue,
    #[serde(default)]
    pub units: JsonValue,
}

impl SubmissionView {
    /// Wrap a record with empty values/units.
    pub fn from_record(record: SubmissionRecord) -> Self {
        SubmissionView {
            id: record.id,
            table_view_id: record.table_view_id,
            name: record.name,
            revision: record.revision,
            active: record.active,
            activated_on: record.activated_on,
            created_on: record.created_on,
            user_id: record.user_id,
            checked_out: record.checked_out,
            checked_out_on: record.checked_out_on,
            permissions_set_id: record.permissions_set_id,
            submitted_by: record.submitted_by,
            data_source: record.data_source,
            status: record.status,
            lei: record.lei,
            nz_id: record.nz_id,
            values: JsonValue::Object(Default::default()),
            units: JsonValue::Object(Default::default()),
        }
    }

    /// Wrap a record and install the materialized trees.
    pub fn with_trees(record: SubmissionRecord, values: JsonValue, units: JsonValue) -> Self {
        let mut view = Self::from_record(record);
        view.values = values;
        view.units = units;
        view
    }
}

/// Input of submission creation.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionCreate {
    pub table_view_id: i64,
    #[serde(default = "default_revision")]
    pub revision: i64,
    pub nz_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lei: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub permissions_set_id: Option<i64>,
    #[serde(default)]
    pub values: JsonValue,
}

fn default_revision() -> i64 {
    1
}

/// One path-addressed edit of a revision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestatementEdit {
    /// Attribute path string addressing the edited field.
    pub path: String,
    /// The new value.
    #[serde(default)]
    pub value: JsonValue,
    /// Why the value was restated.
    pub reason: String,
}

/// Input of a revision request.
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionUpdate {
    pub restatements: Vec<RestatementEdit>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub reporting_datetime: Option<DateTime<Utc>>,
}
