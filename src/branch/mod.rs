//! Branching
//!
//! Isolated copies of a database schema, the persisted branch list and the
//! schema diff between branches.

pub mod diff;
pub mod manager;
pub mod metadata;

pub use diff::{DiffEngine, DiffSummary, SchemaDiff, TableDiff};
pub use manager::{validate_branch_name, BranchManager};
pub use metadata::{BranchMetadata, BranchStore, MetadataStore, DEFAULT_BRANCH};
