//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use flash_core::db::{Capabilities, ColumnTypes, DatabaseAdapter, MemoryAdapter, QueryResult, SessionContext, Statement};
use flash_core::error::{AppError, AppResult};
use flash_core::models::schema::SchemaEnum;
use flash_core::models::SchemaColumn;

pub fn ctx() -> SessionContext {
    SessionContext::new("main")
}

pub async fn create_table(adapter: &MemoryAdapter, ctx: &SessionContext, table: &str, columns: Vec<SchemaColumn>) {
    adapter
        .execute_migration(
            ctx,
            &Statement::CreateTable {
                table: table.to_string(),
                columns,
            },
        )
        .await
        .expect("create table");
}

pub async fn add_foreign_key(adapter: &MemoryAdapter, ctx: &SessionContext, table: &str, column: &str, ref_table: &str) {
    adapter
        .execute_migration(
            ctx,
            &Statement::AddForeignKey {
                table: table.to_string(),
                constraint: Statement::foreign_key_name(table, column),
                column: column.to_string(),
                ref_table: ref_table.to_string(),
                ref_column: "id".to_string(),
                on_delete: "CASCADE".to_string(),
            },
        )
        .await
        .expect("add foreign key");
}

pub async fn insert(adapter: &MemoryAdapter, ctx: &SessionContext, table: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
    adapter
        .execute_migration(
            ctx,
            &Statement::InsertRows {
                table: table.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                types: ColumnTypes::new(),
            },
        )
        .await
        .expect("insert rows");
}

/// users <- posts <- comments (comments also references users)
pub async fn blog_schema(adapter: &MemoryAdapter, ctx: &SessionContext) {
    create_table(
        adapter,
        ctx,
        "users",
        vec![
            SchemaColumn::new("id", "integer").primary().auto_increment(),
            SchemaColumn::new("email", "text").not_null().unique(),
        ],
    )
    .await;
    create_table(
        adapter,
        ctx,
        "posts",
        vec![
            SchemaColumn::new("id", "integer").primary().auto_increment(),
            SchemaColumn::new("user_id", "integer").not_null(),
            SchemaColumn::new("title", "text"),
        ],
    )
    .await;
    create_table(
        adapter,
        ctx,
        "comments",
        vec![
            SchemaColumn::new("id", "integer").primary().auto_increment(),
            SchemaColumn::new("post_id", "integer").not_null(),
            SchemaColumn::new("user_id", "integer").not_null(),
            SchemaColumn::new("body", "text"),
        ],
    )
    .await;

    add_foreign_key(adapter, ctx, "posts", "user_id", "users").await;
    add_foreign_key(adapter, ctx, "comments", "post_id", "posts").await;
    add_foreign_key(adapter, ctx, "comments", "user_id", "users").await;
}

/// Blog schema with 2 users, 3 posts and 4 comments
pub async fn seeded_blog() -> Arc<MemoryAdapter> {
    let adapter = Arc::new(MemoryAdapter::new());
    let ctx = ctx();
    blog_schema(&adapter, &ctx).await;

    insert(
        &adapter,
        &ctx,
        "users",
        &["id", "email"],
        vec![
            vec![json!(1), json!("ada@example.com")],
            vec![json!(2), json!("linus@example.com")],
        ],
    )
    .await;
    insert(
        &adapter,
        &ctx,
        "posts",
        &["id", "user_id", "title"],
        vec![
            vec![json!(1), json!(1), json!("Engines")],
            vec![json!(2), json!(1), json!("Notes")],
            vec![json!(3), json!(2), json!("Kernels")],
        ],
    )
    .await;
    insert(
        &adapter,
        &ctx,
        "comments",
        &["id", "post_id", "user_id", "body"],
        vec![
            vec![json!(1), json!(1), json!(2), json!("nice")],
            vec![json!(2), json!(1), json!(1), json!("thanks")],
            vec![json!(3), json!(3), json!(1), json!("+1")],
            vec![json!(4), json!(2), json!(2), Value::Null],
        ],
    )
    .await;

    adapter
}

pub const BLOG_ROWS: usize = 9;

/// Failures injected by `FaultyAdapter`
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Reject paged reads (`SelectRows` with a limit); whole-table reads succeed
    pub paged_reads: bool,
    /// Stall every row insert for this long inside the session deadline
    pub insert_delay: Option<Duration>,
    /// Reject dropping a branch namespace
    pub drop_schema: bool,
}

/// Memory adapter wrapper that fails selected operations
pub struct FaultyAdapter {
    pub inner: Arc<MemoryAdapter>,
    faults: Faults,
}

impl FaultyAdapter {
    pub fn new(inner: Arc<MemoryAdapter>, faults: Faults) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl DatabaseAdapter for FaultyAdapter {
    fn capabilities(&self) -> &Capabilities {
        self.inner.capabilities()
    }

    async fn get_all_table_names(&self, ctx: &SessionContext) -> AppResult<Vec<String>> {
        self.inner.get_all_table_names(ctx).await
    }

    async fn get_table_columns(&self, ctx: &SessionContext, table: &str) -> AppResult<Vec<SchemaColumn>> {
        self.inner.get_table_columns(ctx, table).await
    }

    async fn get_current_enums(&self, ctx: &SessionContext) -> AppResult<Vec<SchemaEnum>> {
        self.inner.get_current_enums(ctx).await
    }

    async fn execute_query(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<QueryResult> {
        if let Statement::SelectRows { limit: Some(_), .. } = stmt {
            if self.faults.paged_reads {
                return Err(AppError::Internal("paged read rejected".to_string()));
            }
        }
        self.inner.execute_query(ctx, stmt).await
    }

    async fn execute_migration(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<()> {
        if let (Statement::InsertRows { .. }, Some(delay)) = (stmt, self.faults.insert_delay) {
            ctx.run(stmt.label(), async {
                tokio::time::sleep(delay).await;
                Ok::<_, AppError>(())
            })
            .await?;
        }
        self.inner.execute_migration(ctx, stmt).await
    }

    async fn clone_schema_to_branch(&self, ctx: &SessionContext, source: &str, target: &str) -> AppResult<()> {
        self.inner.clone_schema_to_branch(ctx, source, target).await
    }

    async fn drop_branch_schema(&self, ctx: &SessionContext, schema: &str) -> AppResult<()> {
        if self.faults.drop_schema {
            return Err(AppError::Internal(format!("cannot drop '{}' while in use", schema)));
        }
        self.inner.drop_branch_schema(ctx, schema).await
    }

    async fn switch_database(&self, ctx: &SessionContext, name: &str) -> AppResult<()> {
        self.inner.switch_database(ctx, name).await
    }
}
