//! Integration tests for branching: metadata lifecycle, cloning and diff
//! against the in-memory adapter with a real metadata file on disk.

mod common;

use std::sync::Arc;

use anyhow::Result;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use flash_core::branch::{BranchManager, MetadataStore, DEFAULT_BRANCH};
use flash_core::db::{DatabaseAdapter, MemoryAdapter, Statement};
use flash_core::error::AppError;
use flash_core::models::SchemaColumn;

use common::{ctx, seeded_blog, FaultyAdapter, Faults};

fn manager(adapter: Arc<MemoryAdapter>, dir: &TempDir) -> BranchManager {
    BranchManager::new(adapter, dir.path().join("db/migrations"))
}

#[tokio::test]
async fn create_branch_clones_schema_and_data() -> Result<()> {
    let dir = TempDir::new()?;
    let adapter = seeded_blog().await;
    let branches = manager(adapter.clone(), &dir);

    let dev = branches.create_branch(&ctx(), "dev").await?;
    assert_eq!(dev.name, "dev");
    assert_eq!(dev.parent, DEFAULT_BRANCH);
    assert_eq!(dev.schema, "dev");
    assert!(!dev.is_default);

    // Current branch is unchanged
    assert_eq!(branches.get_current_branch()?, DEFAULT_BRANCH);

    let counts = adapter.get_all_table_row_counts(&ctx().with_schema("dev")).await?;
    assert_eq!(counts["users"], 2);
    assert_eq!(counts["comments"], 4);

    let diff = branches.get_schema_diff(&ctx(), DEFAULT_BRANCH, "dev").await?;
    assert!(diff.is_empty());
    assert_eq!(diff.to_string(), "No differences found");
    Ok(())
}

#[tokio::test]
async fn diff_reports_table_added_in_branch() -> Result<()> {
    let dir = TempDir::new()?;
    let adapter = seeded_blog().await;
    let branches = manager(adapter.clone(), &dir);
    branches.create_branch(&ctx(), "dev").await?;

    let dev_ctx = ctx().with_schema(branches.get_branch_schema("dev")?);
    adapter
        .execute_migration(
            &dev_ctx,
            &Statement::CreateTable {
                table: "tags".to_string(),
                columns: vec![SchemaColumn::new("id", "integer").primary()],
            },
        )
        .await?;
    adapter
        .execute_migration(
            &dev_ctx,
            &Statement::AddColumn {
                table: "posts".to_string(),
                column: SchemaColumn::new("published", "boolean"),
            },
        )
        .await?;

    let diff = branches.get_schema_diff(&ctx(), DEFAULT_BRANCH, "dev").await?;
    assert_eq!(diff.tables_added, vec!["tags".to_string()]);
    assert!(diff.tables_removed.is_empty());
    assert_eq!(diff.tables_changed.len(), 1);
    assert_eq!(diff.tables_changed[0].name, "posts");
    assert_eq!(diff.tables_changed[0].columns_added, vec!["published".to_string()]);

    let summary = diff.summary();
    assert_eq!(summary.tables_added, 1);
    assert_eq!(summary.columns_added, 1);

    // Reverse direction sees the table as removed
    let reverse = branches.get_schema_diff(&ctx(), "dev", DEFAULT_BRANCH).await?;
    assert_eq!(reverse.tables_removed, vec!["tags".to_string()]);
    Ok(())
}

#[tokio::test]
async fn diff_of_branch_with_itself_is_empty() -> Result<()> {
    let dir = TempDir::new()?;
    let branches = manager(seeded_blog().await, &dir);
    let diff = branches.get_schema_diff(&ctx(), DEFAULT_BRANCH, DEFAULT_BRANCH).await?;
    assert!(diff.is_empty());
    Ok(())
}

#[tokio::test]
async fn switch_then_activate_binds_session() -> Result<()> {
    let dir = TempDir::new()?;
    let adapter = seeded_blog().await;
    let branches = manager(adapter.clone(), &dir);
    branches.create_branch(&ctx(), "feature-x").await?;

    let switched = branches.switch_branch("feature-x")?;
    assert_eq!(switched.schema, "feature-x");
    assert_eq!(branches.get_current_branch()?, "feature-x");

    let session = branches.activate(&ctx()).await?;
    assert_eq!(session.schema(), "feature-x");
    assert_eq!(adapter.get_table_row_count(&session, "posts").await?, 3);

    // Persisted across manager instances
    let reopened = manager(adapter, &dir);
    assert_eq!(reopened.get_current_branch()?, "feature-x");
    Ok(())
}

#[tokio::test]
async fn delete_and_rename_rules() -> Result<()> {
    let dir = TempDir::new()?;
    let adapter = seeded_blog().await;
    let branches = manager(adapter.clone(), &dir);
    branches.create_branch(&ctx(), "dev").await?;
    branches.create_branch(&ctx(), "scratch").await?;

    let err = branches.delete_branch(&ctx(), DEFAULT_BRANCH).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    branches.switch_branch("dev")?;
    let err = branches.delete_branch(&ctx(), "dev").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    branches.delete_branch(&ctx(), "scratch").await?;
    assert!(!adapter.database_names().await.contains(&"scratch".to_string()));
    assert!(matches!(
        branches.get_branch_schema("scratch"),
        Err(AppError::NotFound(_))
    ));

    branches.rename_branch("dev", "develop")?;
    assert_eq!(branches.get_current_branch()?, "develop");
    // Namespace keeps its original id
    assert_eq!(branches.get_branch_schema("develop")?, "dev");

    let err = branches.rename_branch("develop", DEFAULT_BRANCH).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let (list, current) = branches.list_branches()?;
    let names: Vec<&str> = list.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec![DEFAULT_BRANCH, "develop"]);
    assert_eq!(current, "develop");
    Ok(())
}

#[tokio::test]
async fn metadata_file_shape() -> Result<()> {
    let dir = TempDir::new()?;
    let migrations = dir.path().join("db/migrations");
    let branches = BranchManager::new(seeded_blog().await, &migrations);
    branches.create_branch(&ctx(), "dev").await?;

    let store = MetadataStore::new(&migrations);
    assert_eq!(store.path(), migrations.join(".flash/branches.json"));

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(store.path())?)?;
    assert_eq!(raw["current"], "main");
    assert_eq!(raw["branches"][1]["name"], "dev");
    assert_eq!(raw["branches"][1]["is_default"], false);
    assert!(raw["branches"][1]["created_at"].is_string());
    Ok(())
}

#[tokio::test]
async fn invalid_branch_names_never_reach_adapter() -> Result<()> {
    let dir = TempDir::new()?;
    let adapter = seeded_blog().await;
    let branches = manager(adapter.clone(), &dir);

    for name in ["", "-dev", "has space", "semi;colon"] {
        let err = branches.create_branch(&ctx(), name).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{name:?} gave {err}");
    }
    assert_eq!(adapter.database_names().await, vec!["main".to_string()]);
    Ok(())
}

#[tokio::test]
async fn failed_drop_names_the_branch_and_keeps_metadata() -> Result<()> {
    let dir = TempDir::new()?;
    let faults = Faults {
        drop_schema: true,
        ..Faults::default()
    };
    let adapter = Arc::new(FaultyAdapter::new(seeded_blog().await, faults));
    let branches = BranchManager::new(adapter.clone(), dir.path().join("db/migrations"));
    branches.create_branch(&ctx(), "dev").await?;

    let err = branches.delete_branch(&ctx(), "dev").await.unwrap_err();
    match &err {
        AppError::DropFailure { branch, message } => {
            assert_eq!(branch, "dev");
            assert!(message.contains("'dev'"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("Failed to drop schema for branch 'dev'"));

    assert_eq!(branches.get_branch_schema("dev")?, "dev");
    assert!(adapter.inner.database_names().await.contains(&"dev".to_string()));
    Ok(())
}
