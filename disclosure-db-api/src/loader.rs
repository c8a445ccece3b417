//! The submission read path.
//!
//! Readers prefer the aggregate cache; the cold path batch-fetches every
//! flat row of the submission concurrently and reassembles the nested
//! tree. `db_only` bypasses the aggregate entirely (the validator and the
//! revision manager need the canonical reconstruction).

use crate::assemble::FormAssembler;
use crate::error::{ApiError, Result};
use crate::model::SubmissionView;
use crate::units::UnitResolver;
use disclosure_db_core::schema::TableDef;
use disclosure_db_store::rows::{fetch_form_storage, submission_table_defs, FetchOptions};
use disclosure_db_store::{aggregate, submission, PgPool, SchemaRegistry, SchemaSnapshot, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads submissions, aggregate-first.
#[derive(Clone)]
pub struct SubmissionLoader {
    pool: PgPool,
    registry: Arc<SchemaRegistry>,
    units: Arc<dyn UnitResolver>,
    fetch: FetchOptions,
}

impl SubmissionLoader {
    pub fn new(
        pool: PgPool,
        registry: Arc<SchemaRegistry>,
        units: Arc<dyn UnitResolver>,
        fetch: FetchOptions,
    ) -> Self {
        SubmissionLoader {
            pool,
            registry,
            units,
            fetch,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Load one submission.
    ///
    /// - `use_aggregate`: consult the aggregate cache before reconstructing.
    /// - `db_only`: skip every cache and reconstruct from the flat tables.
    pub async fn load(
        &self,
        submission_id: i64,
        use_aggregate: bool,
        db_only: bool,
    ) -> Result<SubmissionView> {
        if !db_only && use_aggregate {
            if let Some(data) = aggregate::load(&self.pool, submission_id).await? {
                match serde_json::from_value::<SubmissionView>(data) {
                    Ok(view) => {
                        debug!(submission_id, "aggregate hit");
                        return Ok(view);
                    }
                    Err(e) => {
                        // A malformed aggregate falls back to the canonical
                        // reconstruction; the validator reports such rows.
                        warn!(submission_id, error = %e, "malformed aggregate document");
                    }
                }
            }
        }
        self.reconstruct(submission_id).await
    }

    /// Resolve the active submission of an organization for a reporting
    /// year, then load it.
    pub async fn load_by_lei_and_year(
        &self,
        reporting_year: i64,
        lei: &str,
        use_aggregate: bool,
        db_only: bool,
    ) -> Result<SubmissionView> {
        let snapshot = self.registry.snapshot();
        let root_table = snapshot.root_table()?;
        let submission_id =
            submission::active_id_by_lei_and_year(&self.pool, &root_table, lei, reporting_year)
                .await?
                .ok_or_else(|| {
                    ApiError::not_found(format!("submission for {lei}, {reporting_year}"))
                })?;
        self.load(submission_id, use_aggregate, db_only).await
    }

    /// The canonical reconstruction: batched concurrent fetch + reassembly.
    pub async fn reconstruct(&self, submission_id: i64) -> Result<SubmissionView> {
        let record = match submission::get(&self.pool, submission_id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(msg)) => return Err(ApiError::NotFound(msg)),
            Err(e) => return Err(e.into()),
        };
        let snapshot = self.registry.snapshot();
        let root = self.root_table_def(&snapshot, record.table_view_id)?;

        let tables = submission_table_defs(&snapshot, &root);
        let storage =
            fetch_form_storage(&self.pool, &tables, submission_id, self.fetch).await?;

        let assembler = FormAssembler::new(&snapshot, &storage, self.units.as_ref());
        let (values, units) = assembler.assemble(&root)?;
        Ok(SubmissionView::with_trees(record, values, units))
    }

    /// The root form definition behind a table view.
    pub fn root_table_def(
        &self,
        snapshot: &SchemaSnapshot,
        table_view_id: i64,
    ) -> Result<Arc<TableDef>> {
        let view = snapshot
            .table_view(table_view_id)
            .ok_or_else(|| ApiError::not_found(format!("table view {table_view_id}")))?;
        snapshot
            .table_def(view.table_def_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("table definition {}", view.table_def_id)))
    }
}
