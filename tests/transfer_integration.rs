//! Integration tests for export and import: dependency ordering, round trips
//! between adapters, idempotent re-import and on-disk documents.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use flash_core::config::TransferConfig;
use flash_core::db::{DatabaseAdapter, MemoryAdapter};
use flash_core::models::{ExportType, FailureKind, SchemaColumn};
use flash_core::transfer::{read_export_file, write_export_file, ExportEngine, ImportEngine};

use common::{create_table, ctx, insert, seeded_blog, FaultyAdapter, Faults, BLOG_ROWS};

fn table_names(report: &flash_core::models::ExportReport) -> Vec<&str> {
    report.document.tables.iter().map(|t| t.name.as_str()).collect()
}

#[tokio::test]
async fn export_orders_tables_by_foreign_keys() -> Result<()> {
    let adapter = seeded_blog().await;
    let report = ExportEngine::new(adapter, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?;

    assert!(report.is_clean());
    assert_eq!(table_names(&report), vec!["users", "posts", "comments"]);
    assert_eq!(report.document.total_rows(), BLOG_ROWS);
    assert_eq!(report.row_counts["comments"], 4);

    let posts = report.document.table("posts").expect("posts exported");
    let user_id = posts
        .schema
        .as_ref()
        .and_then(|s| s.columns.iter().find(|c| c.name == "user_id"))
        .expect("user_id column");
    assert_eq!(user_id.foreign_key_table, "users");
    assert_eq!(user_id.on_delete_action, "CASCADE");
    Ok(())
}

#[tokio::test]
async fn import_into_empty_database_creates_tables_then_foreign_keys() -> Result<()> {
    let source = seeded_blog().await;
    let document = ExportEngine::new(source, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?
        .document;

    let target = Arc::new(MemoryAdapter::new());
    let result = ImportEngine::new(target.clone(), TransferConfig::default())?
        .import_database(&ctx(), &document)
        .await?;

    assert!(result.is_clean(), "{:?}", result.errors());
    assert_eq!(result.tables_created, 3);
    assert_eq!(result.rows_inserted, BLOG_ROWS);
    assert_eq!(result.rows_updated, 0);

    let comments = target.get_table_columns(&ctx(), "comments").await?;
    let fks: Vec<(&str, &str)> = comments
        .iter()
        .filter(|c| c.has_foreign_key())
        .map(|c| (c.name.as_str(), c.foreign_key_table.as_str()))
        .collect();
    assert_eq!(fks, vec![("post_id", "posts"), ("user_id", "users")]);

    let posts = target.get_table_columns(&ctx(), "posts").await?;
    assert_eq!(posts.iter().filter(|c| c.has_foreign_key()).count(), 1);

    // Checks are back on after the load
    assert_eq!(target.foreign_key_checks("main").await, Some(true));
    Ok(())
}

#[tokio::test]
async fn reimport_updates_instead_of_inserting() -> Result<()> {
    let source = seeded_blog().await;
    let document = ExportEngine::new(source, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?
        .document;

    let target = Arc::new(MemoryAdapter::new());
    let engine = ImportEngine::new(target.clone(), TransferConfig::default())?;
    engine.import_database(&ctx(), &document).await?;

    let again = engine.import_database(&ctx(), &document).await?;
    assert!(again.is_clean(), "{:?}", again.errors());
    assert_eq!(again.tables_created, 0);
    assert_eq!(again.rows_inserted, 0);
    assert_eq!(again.rows_updated, BLOG_ROWS);

    let counts = target.get_all_table_row_counts(&ctx()).await?;
    assert_eq!(counts.values().sum::<u64>(), BLOG_ROWS as u64);
    Ok(())
}

#[tokio::test]
async fn round_trip_preserves_row_counts_and_values() -> Result<()> {
    let source = seeded_blog().await;
    let config = TransferConfig {
        export_batch_size: 2,
        insert_batch_size: 2,
        key_check_batch_size: 1,
    };
    let exported = ExportEngine::new(source.clone(), config.clone())?
        .export_database(&ctx(), ExportType::Complete)
        .await?;

    let target = Arc::new(MemoryAdapter::new());
    ImportEngine::new(target.clone(), config.clone())?
        .import_database(&ctx(), &exported.document)
        .await?;

    assert_eq!(
        source.get_all_table_row_counts(&ctx()).await?,
        target.get_all_table_row_counts(&ctx()).await?
    );

    let second = ExportEngine::new(target, config)?
        .export_database(&ctx(), ExportType::Complete)
        .await?;
    assert_eq!(exported.document.tables, second.document.tables);
    Ok(())
}

#[tokio::test]
async fn data_only_import_merges_into_existing_rows() -> Result<()> {
    let source = seeded_blog().await;
    insert(&source, &ctx(), "users", &["id", "email"], vec![vec![json!(3), json!("grace@example.com")]]).await;
    let document = ExportEngine::new(source, TransferConfig::default())?
        .export_database(&ctx(), ExportType::DataOnly)
        .await?
        .document;
    assert!(document.tables.iter().all(|t| t.schema.is_none()));

    // Target already has the schema and part of the data
    let target = seeded_blog().await;
    let result = ImportEngine::new(target.clone(), TransferConfig::default())?
        .import_database(&ctx(), &document)
        .await?;

    assert!(result.is_clean(), "{:?}", result.errors());
    assert_eq!(result.tables_created, 0);
    assert_eq!(result.rows_inserted, 1);
    assert_eq!(result.rows_updated, BLOG_ROWS);
    assert_eq!(target.get_table_row_count(&ctx(), "users").await?, 3);
    Ok(())
}

#[tokio::test]
async fn schema_only_import_creates_empty_tables() -> Result<()> {
    let document = ExportEngine::new(seeded_blog().await, TransferConfig::default())?
        .export_database(&ctx(), ExportType::SchemaOnly)
        .await?
        .document;

    let target = Arc::new(MemoryAdapter::new());
    let result = ImportEngine::new(target.clone(), TransferConfig::default())?
        .import_database(&ctx(), &document)
        .await?;

    assert_eq!(result.tables_created, 3);
    assert_eq!(result.rows_inserted, 0);
    assert_eq!(target.get_table_row_count(&ctx(), "posts").await?, 0);
    Ok(())
}

#[tokio::test]
async fn failures_are_collected_not_fatal() -> Result<()> {
    let document = ExportEngine::new(seeded_blog().await, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?
        .document;

    // Drop one comment's author from the document so its foreign key cannot be added
    let mut broken = document.clone();
    for table in broken.tables.iter_mut().filter(|t| t.name == "users") {
        if let Some(rows) = table.data.as_mut() {
            rows.retain(|r| r["id"] != json!(2));
        }
    }

    let target = Arc::new(MemoryAdapter::new());
    let result = ImportEngine::new(target.clone(), TransferConfig::default())?
        .import_database(&ctx(), &broken)
        .await?;

    assert_eq!(result.tables_created, 3);
    assert_eq!(result.rows_inserted, BLOG_ROWS - 1);
    let kinds: Vec<FailureKind> = result.failures.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![FailureKind::Constraint, FailureKind::Constraint]);
    assert!(result.errors()[0].contains("posts.user_id"));
    Ok(())
}

#[tokio::test]
async fn export_file_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let report = ExportEngine::new(seeded_blog().await, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?;

    let path = write_export_file(&report.document, dir.path().join("db/export"))?;
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(raw["version"], "1.0");
    assert_eq!(raw["exportType"], "complete");
    assert_eq!(raw["databaseProvider"], "memory");
    assert!(raw["exportedAt"].is_string());

    let loaded = read_export_file(&path)?;
    assert_eq!(loaded, report.document);
    Ok(())
}

#[tokio::test]
async fn reimport_of_composite_key_table_updates_in_place() -> Result<()> {
    let source = Arc::new(MemoryAdapter::new());
    create_table(
        &source,
        &ctx(),
        "post_tags",
        vec![
            SchemaColumn::new("post_id", "integer").primary(),
            SchemaColumn::new("tag_id", "integer").primary(),
            SchemaColumn::new("note", "text"),
        ],
    )
    .await;
    insert(
        &source,
        &ctx(),
        "post_tags",
        &["post_id", "tag_id", "note"],
        vec![
            vec![json!(1), json!(10), json!("first")],
            vec![json!(1), json!(11), Value::Null],
        ],
    )
    .await;
    let document = ExportEngine::new(source, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?
        .document;

    let target = Arc::new(MemoryAdapter::new());
    let engine = ImportEngine::new(target.clone(), TransferConfig::default())?;
    let first = engine.import_database(&ctx(), &document).await?;
    assert!(first.is_clean(), "{:?}", first.errors());
    assert_eq!(first.rows_inserted, 2);

    let again = engine.import_database(&ctx(), &document).await?;
    assert!(again.is_clean(), "{:?}", again.errors());
    assert_eq!(again.rows_inserted, 0);
    assert_eq!(again.rows_updated, 2);
    assert_eq!(target.get_table_row_count(&ctx(), "post_tags").await?, 2);
    Ok(())
}

#[tokio::test]
async fn failed_page_falls_back_to_whole_table_read() -> Result<()> {
    let faults = Faults {
        paged_reads: true,
        ..Faults::default()
    };
    let adapter = Arc::new(FaultyAdapter::new(seeded_blog().await, faults));
    let config = TransferConfig {
        export_batch_size: 2,
        ..TransferConfig::default()
    };
    let report = ExportEngine::new(adapter, config)?
        .export_database(&ctx(), ExportType::DataOnly)
        .await?;

    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.document.total_rows(), BLOG_ROWS);
    let comments = report.document.table("comments").expect("comments exported");
    assert_eq!(comments.rows().len(), 4);
    Ok(())
}

#[tokio::test]
async fn timeout_during_load_restores_foreign_key_checks() -> Result<()> {
    let document = ExportEngine::new(seeded_blog().await, TransferConfig::default())?
        .export_database(&ctx(), ExportType::Complete)
        .await?
        .document;

    let target = Arc::new(MemoryAdapter::new());
    let faults = Faults {
        insert_delay: Some(Duration::from_secs(10)),
        ..Faults::default()
    };
    let adapter = Arc::new(FaultyAdapter::new(target.clone(), faults));
    let session = ctx().with_timeout(Duration::from_millis(300));

    let err = ImportEngine::new(adapter, TransferConfig::default())?
        .import_database(&session, &document)
        .await
        .expect_err("load must hit the deadline");

    assert!(err.is_timeout(), "{}", err);
    assert_eq!(target.foreign_key_checks("main").await, Some(true));
    assert_eq!(target.get_table_row_count(&ctx(), "users").await?, 0);
    Ok(())
}
