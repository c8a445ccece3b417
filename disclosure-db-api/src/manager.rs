//! Submission and revision managers: the write path.
//!
//! `SubmissionManager` creates submissions and fills empty ones;
//! `RevisionManager` applies path-addressed restatements by cloning the
//! previous revision's rows under a new `obj_id` — prior revisions are
//! never mutated. Both recompute the aggregate document whole after every
//! successful write.

use crate::error::{messages, ApiError, Result};
use crate::flatten::SubmissionFlattener;
use crate::loader::SubmissionLoader;
use crate::model::{RestatementEdit, SubmissionCreate, SubmissionView};
use chrono::{DateTime, Utc};
use disclosure_db_core::path::AttributePath;
use disclosure_db_core::value::is_id_field;
use disclosure_db_store::restatement::{self, NewRestatement};
use disclosure_db_store::{aggregate, insert, submission, NewSubmission, SchemaSnapshot, StoreError, SubmissionRecord};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use serde_json::Value as JsonValue;
use tracing::info;

/// Keys a submission may carry without counting as "has values".
const IDENTITY_KEYS: [&str; 2] = ["legal_entity_identifier", "disclosure_source"];

/// Creates submissions and inserts their flattened values.
#[derive(Clone)]
pub struct SubmissionManager {
    loader: SubmissionLoader,
}

impl SubmissionManager {
    pub fn new(loader: SubmissionLoader) -> Self {
        SubmissionManager { loader }
    }

    pub fn loader(&self) -> &SubmissionLoader {
        &self.loader
    }

    /// Create a new submission. Submissions created without values are
    /// checked out to the caller for later filling; submissions created
    /// with values are flattened, inserted and aggregated immediately.
    pub async fn create(
        &self,
        mut input: SubmissionCreate,
        current_user_id: i64,
        status: &str,
    ) -> Result<SubmissionView> {
        let pool = self.loader.pool().clone();
        let snapshot = self.loader.registry().snapshot();
        let root = self
            .loader
            .root_table_def(&snapshot, input.table_view_id)?;

        // Consistent data source across the record and the value tree.
        let data_source = input.data_source.clone().or_else(|| {
            input
                .values
                .get("disclosure_source")
                .and_then(JsonValue::as_str)
                .map(String::from)
        });
        if let (Some(ds), Some(obj)) = (&data_source, input.values.as_object_mut()) {
            obj.insert("disclosure_source".into(), JsonValue::String(ds.clone()));
        }
        let lei = input.lei.clone().or_else(|| {
            input
                .values
                .get("legal_entity_identifier")
                .and_then(JsonValue::as_str)
                .map(String::from)
        });

        let name = match input.name.clone().filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => generate_submission_name(&pool, &root.name).await?,
        };

        let record = submission::insert(
            &pool,
            &NewSubmission {
                table_view_id: input.table_view_id,
                name,
                revision: input.revision,
                submitted_by: current_user_id,
                data_source,
                status: Some(status.to_string()),
                lei,
                nz_id: input.nz_id,
                permissions_set_id: input.permissions_set_id,
            },
        )
        .await?;

        if !has_values(&input.values) {
            // An empty shell: hand the edit lock to the creator and return.
            submission::set_checked_out(&pool, record.id, Some(current_user_id), true).await?;
            let record = submission::get(&pool, record.id).await?;
            return Ok(SubmissionView::from_record(record));
        }

        self.insert_values(&snapshot, &record, &input.values).await?;
        self.save_aggregate(record.id).await?;
        info!(submission_id = record.id, name = %record.name, "submission created");
        self.loader.load(record.id, false, true).await
    }

    /// Fill an empty submission with values. Submissions that already hold
    /// values are immutable outside the revision flow.
    pub async fn update(&self, submission_id: i64, values: &JsonValue) -> Result<SubmissionView> {
        let existing = self.loader.load(submission_id, false, true).await?;
        if has_values(&existing.values) {
            return Err(ApiError::bad_request(messages::SUBMISSION_NOT_EMPTY));
        }
        let snapshot = self.loader.registry().snapshot();
        let record = submission::get(self.loader.pool(), submission_id).await?;
        self.insert_values(&snapshot, &record, values).await?;
        self.save_aggregate(submission_id).await?;
        self.loader.load(submission_id, false, true).await
    }

    /// Reject a second submission for the same organization and reporting
    /// year.
    pub async fn check_duplicate(&self, nz_id: i64, values: &JsonValue) -> Result<()> {
        let Some(reporting_year) = values.get("reporting_year").and_then(JsonValue::as_i64)
        else {
            return Ok(());
        };
        let snapshot = self.loader.registry().snapshot();
        let root_table = snapshot.root_table()?;
        let count =
            submission::count_for_year(self.loader.pool(), &root_table, nz_id, reporting_year)
                .await?;
        if count > 0 {
            return Err(ApiError::bad_request(messages::SUBMISSION_ALREADY_EXISTS));
        }
        Ok(())
    }

    /// Flatten and insert one value tree under a submission record.
    pub async fn insert_values(
        &self,
        snapshot: &SchemaSnapshot,
        record: &SubmissionRecord,
        values: &JsonValue,
    ) -> Result<()> {
        let root = self
            .loader
            .root_table_def(snapshot, record.table_view_id)?;
        let form_id = insert::next_form_id(self.loader.pool(), &root).await?;
        let plan =
            SubmissionFlattener::new(snapshot).flatten(&root, record.id, form_id, values)?;
        insert::insert_plan(self.loader.pool(), &plan).await?;
        Ok(())
    }

    /// Recompute the full materialized document and upsert it whole into
    /// the aggregate cache.
    pub async fn save_aggregate(&self, obj_id: i64) -> Result<()> {
        let view = self.loader.load(obj_id, false, true).await?;
        let snapshot = self.loader.registry().snapshot();
        let table_def_id = snapshot
            .table_view(view.table_view_id)
            .map(|tv| tv.table_def_id);
        let data = serde_json::to_value(&view)?;
        aggregate::upsert(self.loader.pool(), obj_id, table_def_id, &data).await?;
        Ok(())
    }
}

/// Applies path-addressed restatements as new revisions.
pub struct RevisionManager {
    manager: SubmissionManager,
    /// Revision history of one logical submission, newest first.
    history: Vec<SubmissionRecord>,
}

impl RevisionManager {
    /// Load the revision history of a logical submission by name.
    pub async fn load(manager: SubmissionManager, name: &str) -> Result<Self> {
        let history = submission::revision_history(manager.loader.pool(), name).await?;
        if history.is_empty() {
            return Err(ApiError::not_found(format!("submission '{name}'")));
        }
        Ok(RevisionManager { manager, history })
    }

    pub fn last_revision(&self) -> &SubmissionRecord {
        &self.history[0]
    }

    pub fn first_revision(&self) -> &SubmissionRecord {
        self.history.last().expect("history is never empty")
    }

    /// Apply a list of `(path, value, reason)` edits as a new revision.
    ///
    /// The previous revision's tree is reconstructed, each edit applied in
    /// place, and the whole updated tree flattened under a brand-new
    /// `obj_id`; the prior revision's rows are never touched. Restatement
    /// rows carry the path string plus the physical row id it resolved to
    /// in the previous revision.
    pub async fn revise(
        &self,
        edits: &[RestatementEdit],
        current_user_id: i64,
        data_source: Option<String>,
        reporting_datetime: Option<DateTime<Utc>>,
        status: &str,
    ) -> Result<SubmissionView> {
        let pool = self.manager.loader.pool().clone();
        let last = self.last_revision();
        if !last.checked_out {
            return Err(ApiError::conflict(messages::SUBMISSION_CANT_EDIT));
        }

        let previous = self.manager.loader.load(last.id, false, true).await?;
        if !has_values(&previous.values) {
            return Err(ApiError::bad_request(messages::SUBMISSION_EMPTY_REVISION));
        }

        let mut values = strip_none(&previous.values);
        let group_id = self.group_id(&pool).await?;
        let snapshot = self.manager.loader.registry().snapshot();

        let restatement_data_source = data_source.or_else(|| previous.data_source.clone());
        let restatement_reporting_datetime = reporting_datetime.or_else(|| {
            previous
                .values
                .get("reporting_datetime")
                .and_then(JsonValue::as_str)
                .and_then(disclosure_db_core::coerce::parse_datetime)
        });

        let mut pending = Vec::with_capacity(edits.len());
        for edit in edits {
            let mut path = AttributePath::parse(&edit.path)?;
            resolve_row_ids(&pool, &snapshot, last.id, &mut path).await?;
            *path.resolve_mut(&mut values)? = edit.value.clone();
            pending.push(NewRestatement {
                obj_id: 0, // assigned once the new revision exists
                group_id,
                attribute_name: edit.path.clone(),
                attribute_row: path.row_id,
                reason_for_restatement: edit.reason.clone(),
                data_source: restatement_data_source.clone(),
                reporting_datetime: restatement_reporting_datetime,
            });
        }

        // The next revision is a full physical copy under a new obj_id.
        let record = submission::insert(
            &pool,
            &NewSubmission {
                table_view_id: last.table_view_id,
                name: last.name.clone(),
                revision: last.revision + 1,
                submitted_by: current_user_id,
                data_source: restatement_data_source,
                status: Some(status.to_string()),
                lei: last.lei.clone(),
                nz_id: last.nz_id,
                permissions_set_id: last.permissions_set_id,
            },
        )
        .await?;
        self.manager
            .insert_values(&snapshot, &record, &values)
            .await?;

        // Exactly one revision stays active.
        submission::set_active(&pool, last.id, false).await?;

        for mut new_restatement in pending {
            new_restatement.obj_id = record.id;
            restatement::insert(&pool, &new_restatement).await?;
        }

        self.manager.save_aggregate(record.id).await?;
        info!(
            submission = %record.name,
            revision = record.revision,
            restatements = edits.len(),
            "revision created"
        );
        self.manager.loader.load(record.id, false, true).await
    }

    /// The shared restatement group id: revision 1's submission id. Longer
    /// histories read it back from the existing restatement chain.
    async fn group_id(&self, pool: &disclosure_db_store::PgPool) -> Result<i64> {
        if self.history.len() == 1 {
            return Ok(self.first_revision().id);
        }
        let chain = restatement::list_for_group(pool, self.first_revision().id).await?;
        match chain.first() {
            Some(first) => Ok(first.group_id),
            None => Err(ApiError::internal(format!(
                "restatement data integrity is corrupted: the revision history and \
                 restatement history don't match for submission {}",
                self.last_revision().name
            ))),
        }
    }

    /// Take the advisory edit lock on the active revision.
    pub async fn checkout(&self, current_user_id: i64) -> Result<SubmissionRecord> {
        let pool = self.manager.loader.pool();
        let active = self.active_revision()?;
        if active.checked_out {
            return Err(ApiError::conflict(messages::SUBMISSION_CANT_CHECK_OUT));
        }
        submission::set_checked_out(pool, active.id, Some(current_user_id), true).await?;
        Ok(submission::get(pool, active.id).await?)
    }

    /// Release the advisory edit lock. Only the holder may release it.
    pub async fn release(&self, current_user_id: i64) -> Result<SubmissionRecord> {
        let pool = self.manager.loader.pool();
        let active = self.active_revision()?;
        if active.checked_out && active.user_id.is_some_and(|uid| uid != current_user_id) {
            return Err(ApiError::conflict(
                messages::SUBMISSION_CHECKED_OUT_BY_ANOTHER_USER,
            ));
        }
        submission::set_checked_out(pool, active.id, None, false).await?;
        Ok(submission::get(pool, active.id).await?)
    }

    /// Deactivate the current active revision and reactivate the previous
    /// one. Exactly two flags flip; with no previous revision to restore
    /// the rollback fails.
    pub async fn rollback(&self) -> Result<(SubmissionRecord, SubmissionRecord)> {
        let pool = self.manager.loader.pool();
        let (active, previous) = select_rollback_pair(&self.history)?;

        submission::set_active(pool, active.id, false).await?;
        submission::set_active(pool, previous.id, true).await?;
        info!(
            submission = %active.name,
            from_revision = active.revision,
            to_revision = previous.revision,
            "rollback"
        );
        Ok((
            submission::get(pool, active.id).await?,
            submission::get(pool, previous.id).await?,
        ))
    }

    fn active_revision(&self) -> Result<&SubmissionRecord> {
        self.history
            .iter()
            .find(|r| r.active)
            .ok_or_else(|| ApiError::not_found(messages::SUBMISSION_NO_ACTIVE))
    }
}

/// Pick the revisions a rollback flips: the current active one and the
/// highest inactive revision below it. History is ordered newest first.
fn select_rollback_pair(
    history: &[SubmissionRecord],
) -> Result<(&SubmissionRecord, &SubmissionRecord)> {
    let active = history
        .iter()
        .find(|r| r.active)
        .ok_or_else(|| ApiError::not_found(messages::SUBMISSION_NO_ACTIVE))?;
    let previous = history
        .iter()
        .find(|r| !r.active && r.revision < active.revision)
        .ok_or_else(|| ApiError::not_found(messages::SUBMISSION_NO_PREVIOUS_ACTIVE))?;
    Ok((active, previous))
}

/// Resolve the physical row ids of every level of a path against the flat
/// tables of one submission, innermost level first.
pub fn resolve_row_ids<'a>(
    pool: &'a disclosure_db_store::PgPool,
    snapshot: &'a SchemaSnapshot,
    obj_id: i64,
    path: &'a mut AttributePath,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if let Some(sub) = path.sub_path.as_deref_mut() {
            resolve_row_ids(pool, snapshot, obj_id, sub).await?;
        }
        let table = match &path.form {
            Some(form) => {
                let column = snapshot.column_def(form).ok_or_else(|| {
                    ApiError::not_found(format!("no column definition for form '{form}'"))
                })?;
                snapshot
                    .sub_table_def(column)
                    .ok_or_else(|| {
                        ApiError::not_found(format!("no table definition behind form '{form}'"))
                    })?
                    .physical_name()
            }
            None => {
                // Root-level attribute: the owning table of the attribute
                // column.
                let column = snapshot.column_def(&path.attribute).ok_or_else(|| {
                    ApiError::not_found(format!(
                        "no column definition for attribute '{}'",
                        path.attribute
                    ))
                })?;
                snapshot
                    .owning_table_def(column)
                    .ok_or_else(|| {
                        ApiError::not_found(format!(
                            "no owning table for attribute '{}'",
                            path.attribute
                        ))
                    })?
                    .physical_name()
            }
        };
        let row_id = insert::resolve_row_id(
            pool,
            &table,
            obj_id,
            path.choice.field.as_deref(),
            path.choice.value,
            path.choice.index,
        )
        .await
        .map_err(|e| match e {
            StoreError::NotFound(msg) => ApiError::bad_request(format!(
                "cannot create revision: {msg}. Use update submission API instead."
            )),
            other => other.into(),
        })?;
        path.row_id = row_id;
        Ok(())
    }
    .boxed()
}

/// Whether a value tree holds anything beyond the identity keys.
pub fn has_values(values: &JsonValue) -> bool {
    match values.as_object() {
        None => false,
        Some(map) => map
            .keys()
            .any(|k| !IDENTITY_KEYS.contains(&k.as_str())),
    }
}

/// Recursively strip nulls and row-identity fields from a value tree.
pub fn strip_none(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(k, v)| !v.is_null() && !is_id_field(k))
                .map(|(k, v)| (k.clone(), strip_none(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(strip_none)
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Generate a unique submission name: form, next id, timestamp, suffix.
async fn generate_submission_name(
    pool: &disclosure_db_store::PgPool,
    form_name: &str,
) -> Result<String> {
    let next_id = submission::max_id(pool).await?.map(|id| id + 1).unwrap_or(0);
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let suffix = rand::thread_rng().gen_range(b'A'..=b'Z') as char;
    Ok(format!("DDB-{form_name}-{next_id}-{nanos}-{suffix}"))
}
