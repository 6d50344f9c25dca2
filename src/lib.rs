//! Flash Core
//!
//! Schema branching, schema diff and portable export/import for relational
//! databases. Branches are isolated namespaces (a Postgres schema, or a
//! separate database on providers without schemas) tracked in a small JSON
//! metadata file next to the migrations. Export walks tables in foreign-key
//! order; import replays a document idempotently by primary key.
//!
//! All database access goes through the [`db::DatabaseAdapter`] trait with an
//! explicit [`db::SessionContext`].

pub mod branch;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod transfer;

pub use branch::{BranchManager, BranchMetadata, DiffEngine, SchemaDiff};
pub use config::Settings;
pub use db::{
    activate_branch, connect_adapter, Capabilities, DatabaseAdapter, MemoryAdapter, PostgresAdapter, Provider,
    SessionContext, Statement,
};
pub use error::{AppError, AppResult};
pub use models::{ExportData, ExportReport, ExportType, ImportResult, SchemaColumn, SchemaSnapshot, SchemaTable};
pub use transfer::{read_export_file, write_export_file, DependencySorter, ExportEngine, ImportEngine};
