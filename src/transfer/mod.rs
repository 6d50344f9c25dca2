//! Export and import
//!
//! Portable snapshots of a namespace's schema and data, ordered so that
//! referenced tables always come before the tables that reference them.

pub mod export;
pub mod guard;
pub mod import;
pub mod sorter;

pub use export::{write_export_file, ExportEngine};
pub use guard::ForeignKeyGuard;
pub use import::{read_export_file, ImportEngine};
pub use sorter::{DependencyMap, DependencySorter, SortOutcome};
