//! Data models
//!
//! Schema snapshots and the portable export document.

pub mod export;
pub mod schema;

// Re-export commonly used types
pub use export::*;
pub use schema::*;
