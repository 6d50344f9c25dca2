//! Database adapter layer
//!
//! Defines the capability contract every provider implements, the session
//! context threaded through each call, and the fixed per-provider capability
//! set. Engines talk to databases exclusively through `DatabaseAdapter`.

pub mod memory;
pub mod postgres;
pub mod queries;
pub mod statement;

pub use memory::MemoryAdapter;
pub use postgres::PostgresAdapter;
pub use statement::{ColumnTypes, SqlDialect, Statement};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::schema::{SchemaEnum, SchemaTable};
use crate::models::SchemaColumn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Migration bookkeeping table, never exported or cloned
pub const MIGRATIONS_TABLE: &str = "_flash_migrations";

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Supported database providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
    #[serde(alias = "sqlite3")]
    Sqlite,
    Memory,
}

impl Provider {
    /// Infer the provider from a connection URL scheme
    pub fn from_url(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        match parsed.scheme() {
            "postgres" | "postgresql" => Some(Provider::Postgres),
            "mysql" => Some(Provider::MySql),
            "sqlite" | "sqlite3" | "file" => Some(Provider::Sqlite),
            "memory" => Some(Provider::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Postgres => "postgresql",
            Provider::MySql => "mysql",
            Provider::Sqlite => "sqlite",
            Provider::Memory => "memory",
        }
    }

    /// Namespace of the root branch. MySQL uses the database named in the URL.
    pub fn default_schema(&self, database_url: &str) -> String {
        match self {
            Provider::Postgres => "public".to_string(),
            Provider::MySql => url::Url::parse(database_url)
                .ok()
                .map(|u| u.path().trim_start_matches('/').to_string())
                .filter(|db| !db.is_empty())
                .unwrap_or_else(|| "mysql".to_string()),
            Provider::Sqlite | Provider::Memory => "main".to_string(),
        }
    }

    /// Namespace id for a branch. Server providers get a prefixed schema or
    /// database, file-based providers use the branch name as is.
    pub fn branch_schema(&self, branch: &str) -> String {
        match self {
            Provider::Postgres | Provider::MySql => format!("flash_branch_{}", branch),
            Provider::Sqlite | Provider::Memory => branch.to_string(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider isolates branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaScope {
    /// Branches are schemas inside one database, selected per session
    SearchPath,
    /// Branches are separate databases, selected by reconnecting
    DatabasePerBranch,
}

/// Capability set, fixed when the adapter is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub provider: Provider,
    pub schema_scope: SchemaScope,
    pub enum_types: bool,
    pub sequences: bool,
    /// Namespace of the root branch
    pub default_schema: String,
}

impl Capabilities {
    pub fn for_provider(provider: Provider, default_schema: impl Into<String>) -> Self {
        let (schema_scope, enum_types, sequences) = match provider {
            Provider::Postgres => (SchemaScope::SearchPath, true, true),
            Provider::MySql => (SchemaScope::DatabasePerBranch, false, false),
            Provider::Sqlite => (SchemaScope::DatabasePerBranch, false, false),
            Provider::Memory => (SchemaScope::DatabasePerBranch, true, false),
        };
        Self {
            provider,
            schema_scope,
            enum_types,
            sequences,
            default_schema: default_schema.into(),
        }
    }
}

/// Session state passed to every adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    schema: String,
    deadline: Option<Instant>,
}

impl SessionContext {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            deadline: None,
        }
    }

    /// Expire the context `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Same deadline, bound to another namespace
    pub fn with_schema(&self, schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            deadline: self.deadline,
        }
    }

    /// Same namespace, no deadline. Used for cleanup that must not be cut short.
    pub fn without_deadline(&self) -> Self {
        Self::new(self.schema.clone())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` to completion unless the deadline passes first
    pub async fn run<T, F>(&self, op: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| AppError::Timeout(format!("{} exceeded the session deadline", op)))?,
            None => fut.await,
        }
    }
}

/// Rows returned by `execute_query`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn first_value(&self) -> Option<&Value> {
        let row = self.rows.first()?;
        match self.columns.first() {
            Some(col) => row.get(col),
            None => row.values().next(),
        }
    }

    /// First value as an unsigned count; text results are parsed
    pub fn first_u64(&self) -> Option<u64> {
        match self.first_value()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Canonical text form of a key value, so `1` and `"1"` compare equal
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical form of a multi-column key; single values match `canonical_key`
pub fn canonical_tuple<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    values
        .into_iter()
        .map(canonical_key)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Provider capability contract
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn capabilities(&self) -> &Capabilities;

    fn provider(&self) -> Provider {
        self.capabilities().provider
    }

    /// Base table names in the session namespace
    async fn get_all_table_names(&self, ctx: &SessionContext) -> AppResult<Vec<String>>;

    /// Ordered columns of one table
    async fn get_table_columns(&self, ctx: &SessionContext, table: &str) -> AppResult<Vec<SchemaColumn>>;

    async fn get_table_row_count(&self, ctx: &SessionContext, table: &str) -> AppResult<u64> {
        let result = self
            .execute_query(ctx, &Statement::CountRows { table: table.to_string() })
            .await?;
        result
            .first_u64()
            .ok_or_else(|| AppError::Internal(format!("Row count for '{}' was not a number", table)))
    }

    async fn get_all_table_row_counts(&self, ctx: &SessionContext) -> AppResult<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for table in self.get_all_table_names(ctx).await? {
            let count = self.get_table_row_count(ctx, &table).await?;
            counts.insert(table, count);
        }
        Ok(counts)
    }

    /// Live snapshot of every table in the session namespace
    async fn get_current_schema(&self, ctx: &SessionContext) -> AppResult<Vec<SchemaTable>> {
        let mut tables = Vec::new();
        for name in self.get_all_table_names(ctx).await? {
            let columns = self.get_table_columns(ctx, &name).await?;
            tables.push(SchemaTable::new(name, columns));
        }
        Ok(tables)
    }

    async fn get_current_enums(&self, _ctx: &SessionContext) -> AppResult<Vec<SchemaEnum>> {
        Ok(Vec::new())
    }

    async fn execute_query(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<QueryResult>;

    async fn execute_migration(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<()>;

    /// Copy DDL and data of `source` into a fresh `target` namespace
    async fn clone_schema_to_branch(&self, ctx: &SessionContext, source: &str, target: &str) -> AppResult<()>;

    async fn drop_branch_schema(&self, ctx: &SessionContext, schema: &str) -> AppResult<()>;

    async fn switch_database(&self, _ctx: &SessionContext, name: &str) -> AppResult<()> {
        Err(AppError::AdapterUnsupported(format!(
            "{} cannot switch database to '{}'",
            self.provider(),
            name
        )))
    }
}

/// Bind a session to a branch namespace after a switch.
///
/// Search-path providers only need a rebound context; database-per-branch
/// providers must also reconnect.
pub async fn activate_branch(
    adapter: &dyn DatabaseAdapter,
    ctx: &SessionContext,
    schema: &str,
) -> AppResult<SessionContext> {
    if adapter.capabilities().schema_scope == SchemaScope::DatabasePerBranch {
        adapter.switch_database(ctx, schema).await?;
    }
    debug!("Session bound to '{}'", schema);
    Ok(ctx.with_schema(schema))
}

/// Open the adapter for a configured database
pub async fn connect_adapter(config: &DatabaseConfig) -> AppResult<Arc<dyn DatabaseAdapter>> {
    match config.resolved_provider()? {
        Provider::Postgres => Ok(Arc::new(PostgresAdapter::connect(&config.url).await?)),
        Provider::Memory => Ok(Arc::new(MemoryAdapter::new())),
        other => Err(AppError::AdapterUnsupported(format!(
            "no adapter is available for {}",
            other
        ))),
    }
}
