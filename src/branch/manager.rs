//! Branch lifecycle manager
//!
//! Create, switch, delete, rename and list branches. Every operation loads
//! the metadata store, mutates it and saves it back before returning.

use crate::branch::diff::{DiffEngine, SchemaDiff};
use crate::branch::metadata::{BranchMetadata, BranchStore, MetadataStore};
use crate::config::Settings;
use crate::db::{activate_branch, DatabaseAdapter, SessionContext, MIGRATIONS_TABLE};
use crate::error::{conflict_error, not_found_error, validation_error, AppError, AppResult};
use crate::models::schema::SchemaSnapshot;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

static BRANCH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,49}$").expect("branch name pattern is valid"));

/// Reject names that cannot be used as a namespace suffix
pub fn validate_branch_name(name: &str) -> AppResult<()> {
    if BRANCH_NAME.is_match(name) {
        Ok(())
    } else {
        Err(validation_error(format!(
            "invalid branch name '{}': use letters, digits, '_' or '-' (max 50 characters)",
            name
        )))
    }
}

pub struct BranchManager {
    adapter: Arc<dyn DatabaseAdapter>,
    metadata: MetadataStore,
}

impl BranchManager {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, migrations_path: impl AsRef<Path>) -> Self {
        Self {
            adapter,
            metadata: MetadataStore::new(migrations_path),
        }
    }

    pub fn from_settings(adapter: Arc<dyn DatabaseAdapter>, settings: &Settings) -> Self {
        Self::new(adapter, &settings.migrations_path)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    fn load(&self) -> AppResult<BranchStore> {
        self.metadata.load(&self.adapter.capabilities().default_schema)
    }

    /// Clone the current branch into a new branch. The current branch is unchanged.
    pub async fn create_branch(&self, ctx: &SessionContext, name: &str) -> AppResult<BranchMetadata> {
        validate_branch_name(name)?;
        let mut store = self.load()?;

        if store.get(name).is_some() {
            return Err(conflict_error(format!("branch '{}' already exists", name)));
        }

        let source = store
            .get(&store.current)
            .ok_or_else(|| not_found_error(format!("current branch '{}' not found", store.current)))?
            .schema
            .clone();
        let schema = self.adapter.provider().branch_schema(name);

        info!("Creating branch '{}' from '{}' ({} -> {})", name, store.current, source, schema);
        self.adapter
            .clone_schema_to_branch(ctx, &source, &schema)
            .await
            .map_err(|e| match e {
                AppError::Timeout(_) => e,
                other => AppError::CloneFailure {
                    branch: name.to_string(),
                    message: other.to_string(),
                },
            })?;

        let branch = BranchMetadata {
            name: name.to_string(),
            parent: store.current.clone(),
            schema,
            created_at: Utc::now(),
            is_default: false,
        };
        store.add(branch.clone())?;
        self.metadata.save(&store)?;

        Ok(branch)
    }

    /// Make `name` the current branch. Only metadata changes; call
    /// `activate` to bind a session to it.
    pub fn switch_branch(&self, name: &str) -> AppResult<BranchMetadata> {
        let mut store = self.load()?;
        let branch = store.require(name)?.clone();

        store.current = name.to_string();
        self.metadata.save(&store)?;

        info!("Switched to branch '{}'", name);
        Ok(branch)
    }

    /// Drop a branch namespace and forget the branch
    pub async fn delete_branch(&self, ctx: &SessionContext, name: &str) -> AppResult<()> {
        let mut store = self.load()?;
        let branch = store.require(name)?;

        if branch.is_default {
            return Err(conflict_error(format!("cannot delete default branch '{}'", name)));
        }
        if store.current == name {
            return Err(conflict_error(format!("cannot delete current branch '{}'", name)));
        }

        self.adapter
            .drop_branch_schema(ctx, &branch.schema)
            .await
            .map_err(|e| match e {
                AppError::Timeout(_) => e,
                other => AppError::DropFailure {
                    branch: name.to_string(),
                    message: other.to_string(),
                },
            })?;
        store.remove(name)?;
        self.metadata.save(&store)?;

        info!("Deleted branch '{}'", name);
        Ok(())
    }

    /// Rename a branch in metadata only; its namespace keeps the old id
    pub fn rename_branch(&self, old_name: &str, new_name: &str) -> AppResult<()> {
        validate_branch_name(new_name)?;
        let mut store = self.load()?;

        store.require(old_name)?;
        if store.get(new_name).is_some() {
            return Err(conflict_error(format!("branch '{}' already exists", new_name)));
        }

        if let Some(branch) = store.get_mut(old_name) {
            branch.name = new_name.to_string();
        }
        if store.current == old_name {
            store.current = new_name.to_string();
        }
        self.metadata.save(&store)?;

        info!("Renamed branch '{}' to '{}'", old_name, new_name);
        Ok(())
    }

    /// All branches and the name of the current one
    pub fn list_branches(&self) -> AppResult<(Vec<BranchMetadata>, String)> {
        let store = self.load()?;
        Ok((store.branches, store.current))
    }

    pub fn get_current_branch(&self) -> AppResult<String> {
        Ok(self.load()?.current)
    }

    pub fn get_branch_schema(&self, name: &str) -> AppResult<String> {
        Ok(self.load()?.require(name)?.schema.clone())
    }

    /// Bind a session to the current branch namespace
    pub async fn activate(&self, ctx: &SessionContext) -> AppResult<SessionContext> {
        let store = self.load()?;
        let schema = store.require(&store.current)?.schema.clone();
        activate_branch(self.adapter.as_ref(), ctx, &schema).await
    }

    /// Differences going from `from` to `to`, each read from its own namespace
    pub async fn get_schema_diff(&self, ctx: &SessionContext, from: &str, to: &str) -> AppResult<SchemaDiff> {
        let store = self.load()?;
        let from_schema = store.require(from)?.schema.clone();
        let to_schema = store.require(to)?.schema.clone();

        let before = self.snapshot(&ctx.with_schema(from_schema)).await?;
        let after = self.snapshot(&ctx.with_schema(to_schema)).await?;

        let diff = DiffEngine::compare(&before, &after);
        debug!("Diff {} -> {}: {:?}", from, to, diff.summary());
        Ok(diff)
    }

    async fn snapshot(&self, ctx: &SessionContext) -> AppResult<SchemaSnapshot> {
        let mut tables = self.adapter.get_current_schema(ctx).await?;
        tables.retain(|t| t.name != MIGRATIONS_TABLE);
        Ok(SchemaSnapshot::new(ctx.schema(), tables))
    }
}
