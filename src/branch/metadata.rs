//! Branch metadata store
//!
//! The branch list lives in `<migrations>/.flash/branches.json`. It is loaded
//! at the start of every branch operation, mutated in memory and saved back
//! immediately. Single process, no locking.

use crate::error::{conflict_error, not_found_error, AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the root branch created on first use
pub const DEFAULT_BRANCH: &str = "main";

const METADATA_DIR: &str = ".flash";
const METADATA_FILE: &str = "branches.json";

/// One branch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub name: String,
    /// Branch this one was created from; empty for the root
    #[serde(default)]
    pub parent: String,
    /// Provider namespace holding this branch
    pub schema: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_default: bool,
}

/// All branches plus the current one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStore {
    pub current: String,
    pub branches: Vec<BranchMetadata>,
}

impl BranchStore {
    /// A store holding only the default branch
    pub fn with_default(default_schema: &str) -> Self {
        Self {
            current: DEFAULT_BRANCH.to_string(),
            branches: vec![BranchMetadata {
                name: DEFAULT_BRANCH.to_string(),
                parent: String::new(),
                schema: default_schema.to_string(),
                created_at: Utc::now(),
                is_default: true,
            }],
        }
    }

    pub fn get(&self, name: &str) -> Option<&BranchMetadata> {
        self.branches.iter().find(|b| b.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BranchMetadata> {
        self.branches.iter_mut().find(|b| b.name == name)
    }

    /// Look up a branch, failing with NotFound
    pub fn require(&self, name: &str) -> AppResult<&BranchMetadata> {
        self.get(name)
            .ok_or_else(|| not_found_error(format!("branch '{}' not found", name)))
    }

    pub fn add(&mut self, branch: BranchMetadata) -> AppResult<()> {
        if self.get(&branch.name).is_some() {
            return Err(conflict_error(format!("branch '{}' already exists", branch.name)));
        }
        self.branches.push(branch);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> AppResult<BranchMetadata> {
        let index = self
            .branches
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| not_found_error(format!("branch '{}' not found", name)))?;
        Ok(self.branches.remove(index))
    }
}

/// Reads and writes the persisted branch store
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(migrations_path: impl AsRef<Path>) -> Self {
        Self {
            path: migrations_path.as_ref().join(METADATA_DIR).join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store, or a fresh default store when nothing is persisted yet
    pub fn load(&self, default_schema: &str) -> AppResult<BranchStore> {
        if !self.path.exists() {
            debug!("No branch metadata at {}, using default", self.path.display());
            return Ok(BranchStore::with_default(default_schema));
        }

        let data = fs::read_to_string(&self.path)?;
        serde_json::from_str(&data).map_err(|e| {
            AppError::Internal(format!(
                "failed to parse branches file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Persist the whole store, replacing the file atomically
    pub fn save(&self, store: &BranchStore) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(store)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
