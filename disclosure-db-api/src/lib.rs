//! # Disclosure DB API
//!
//! The submission engines of Disclosure DB, layered over
//! `disclosure-db-core` (pure model) and `disclosure-db-store` (Postgres):
//!
//! - [`assemble`]: rebuild one nested value tree (plus its units tree) from
//!   the flat rows of a submission
//! - [`flatten`]: decompose a nested value tree into insert-ready rows,
//!   allocating sub-form ids and collecting constraint violations
//! - [`loader`]: the read path, aggregate-cache-first with a batched
//!   concurrent database fallback
//! - [`manager`]: create/update submissions, revise them through
//!   path-addressed restatements, check-out locking and rollback
//! - [`validator`]: recompute-and-diff consistency checking of the
//!   aggregate cache
//! - [`search`]: run the search SQL and hydrate hits

pub mod assemble;
pub mod error;
pub mod flatten;
pub mod loader;
pub mod manager;
pub mod model;
pub mod search;
pub mod units;
pub mod validator;

pub use assemble::FormAssembler;
pub use error::{ApiError, Result};
pub use flatten::SubmissionFlattener;
pub use loader::SubmissionLoader;
pub use manager::{RevisionManager, SubmissionManager};
pub use model::{RestatementEdit, RevisionUpdate, SubmissionCreate, SubmissionView};
pub use search::{SearchResults, SearchService};
pub use units::{NoUnits, UnitResolver};
pub use validator::{AggregateValidator, Difference, DriftReport, ValidationReport};
