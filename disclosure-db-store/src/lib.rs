//! # Disclosure DB Store
//!
//! PostgreSQL layer for the Disclosure DB submission engine.
//!
//! All SQL in this crate is runtime-checked (`sqlx::query`, not the
//! compile-time macros): form tables are created from user-authored schema
//! definitions, so their names and columns only exist at runtime. Table and
//! column identifiers interpolated into SQL always come from the schema
//! registry, never from request input; request values travel as binds.
//!
//! The crate owns:
//! - the schema registry snapshot and its refresh ([`registry`])
//! - dynamic form-table row fetch and insert ([`rows`], [`insert`])
//! - submission records, aggregates and restatements
//! - the search/sort SQL builder ([`search`])

pub mod aggregate;
pub mod error;
pub mod insert;
pub mod registry;
pub mod restatement;
pub mod rows;
pub mod search;
pub mod submission;

pub use error::{Result, StoreError};
pub use registry::{SchemaRegistry, SchemaSnapshot};
pub use rows::FetchOptions;
pub use search::{SearchHit, SearchMeta, SearchQuery, SearchQueryBuilder, SortOrder, SortSpec};
pub use submission::{SubmissionRecord, NewSubmission};

/// Connection pool alias used across the crate.
pub type PgPool = sqlx::PgPool;

/// Static-table schema, embedded at compile time. Form data tables are
/// created separately, from the schema definitions these tables hold.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Create the static tables if they do not exist.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}
