//! In-memory adapter
//!
//! Holds one database per branch in process memory and interprets
//! `Statement` values directly. Enforces primary-key uniqueness, NOT NULL,
//! and foreign keys while checks are enabled, the same way a SQL backend
//! would reject the equivalent statements.

use crate::db::{
    canonical_key, canonical_tuple, Capabilities, DatabaseAdapter, Provider, QueryResult, Row, SessionContext, Statement,
    MIGRATIONS_TABLE,
};
use crate::error::{conflict_error, not_found_error, AppError, AppResult};
use crate::models::schema::SchemaEnum;
use crate::models::SchemaColumn;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<SchemaColumn>,
    rows: Vec<Row>,
}

impl MemTable {
    fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect()
    }

    fn contains(&self, column: &str, value: &Value) -> bool {
        let wanted = canonical_key(value);
        self.rows
            .iter()
            .any(|r| r.get(column).map(canonical_key).as_deref() == Some(wanted.as_str()))
    }

    fn next_serial(&self, column: &str) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Canonical key of `row` over `columns`, missing values read as NULL
fn row_key(row: &Row, columns: &[String]) -> String {
    canonical_tuple(columns.iter().map(|c| row.get(c).unwrap_or(&NULL)))
}

#[derive(Debug, Clone)]
struct MemDatabase {
    tables: BTreeMap<String, MemTable>,
    enums: BTreeMap<String, Vec<String>>,
    foreign_key_checks: bool,
}

impl Default for MemDatabase {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            enums: BTreeMap::new(),
            foreign_key_checks: true,
        }
    }
}

impl MemDatabase {
    fn table(&self, name: &str) -> AppResult<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| not_found_error(format!("relation \"{}\" does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> AppResult<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| not_found_error(format!("relation \"{}\" does not exist", name)))
    }

    /// Check every FK value of `row` against the referenced tables
    fn check_references(&self, table: &str, row: &Row) -> AppResult<()> {
        if !self.foreign_key_checks {
            return Ok(());
        }
        let columns = &self.table(table)?.columns;
        for col in columns.iter().filter(|c| c.has_foreign_key()) {
            let value = match row.get(&col.name) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            let referenced = self.table(&col.foreign_key_table)?;
            if !referenced.contains(&col.foreign_key_column, value) {
                return Err(AppError::ConstraintFailure(format!(
                    "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                    table,
                    Statement::foreign_key_name(table, &col.name)
                )));
            }
        }
        Ok(())
    }

    fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> AppResult<u64> {
        let target = self.table(table)?;
        for name in columns {
            if target.column(name).is_none() {
                return Err(not_found_error(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    name, table
                )));
            }
        }

        let pk = target.primary_key();
        let mut seen: HashSet<String> = if pk.is_empty() {
            HashSet::new()
        } else {
            target.rows.iter().map(|r| row_key(r, &pk)).collect()
        };

        // Validate the whole batch before applying any of it
        let mut prepared = Vec::with_capacity(rows.len());
        let mut serials: BTreeMap<String, i64> = BTreeMap::new();
        for values in rows {
            if values.len() != columns.len() {
                return Err(AppError::Validation(format!(
                    "INSERT into \"{}\" has {} values for {} columns",
                    table,
                    values.len(),
                    columns.len()
                )));
            }
            let mut row: Row = columns.iter().cloned().zip(values.iter().cloned()).collect();

            for col in &target.columns {
                let present = row.get(&col.name).is_some_and(|v| !v.is_null());
                if !present && col.is_auto_increment {
                    let next = serials
                        .entry(col.name.clone())
                        .or_insert_with(|| target.next_serial(&col.name));
                    row.insert(col.name.clone(), Value::from(*next));
                    *next += 1;
                } else if !row.contains_key(&col.name) {
                    row.insert(col.name.clone(), default_value(col));
                }
                if !col.nullable && row.get(&col.name).map_or(true, Value::is_null) {
                    return Err(AppError::ConstraintFailure(format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        col.name, table
                    )));
                }
            }

            if !pk.is_empty() && !seen.insert(row_key(&row, &pk)) {
                let values: Vec<String> = pk
                    .iter()
                    .map(|c| canonical_key(row.get(c).unwrap_or(&NULL)))
                    .collect();
                return Err(AppError::ConstraintFailure(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\": ({})=({})",
                    table,
                    pk.join(", "),
                    values.join(", ")
                )));
            }
            self.check_references(table, &row)?;
            prepared.push(row);
        }

        let count = prepared.len() as u64;
        self.table_mut(table)?.rows.extend(prepared);
        Ok(count)
    }

    fn update_row(&mut self, table: &str, key: &[(String, Value)], assignments: &[(String, Value)]) -> AppResult<u64> {
        let target = self.table(table)?;
        for (name, _) in key.iter().chain(assignments) {
            if target.column(name).is_none() {
                return Err(not_found_error(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    name, table
                )));
            }
        }

        let key_columns: Vec<String> = key.iter().map(|(c, _)| c.clone()).collect();
        let wanted = canonical_tuple(key.iter().map(|(_, v)| v));
        let position = target.rows.iter().position(|r| row_key(r, &key_columns) == wanted);
        let Some(index) = position else {
            return Ok(0);
        };

        let mut updated = target.rows[index].clone();
        for (name, value) in assignments {
            updated.insert(name.clone(), value.clone());
        }
        self.check_references(table, &updated)?;
        self.table_mut(table)?.rows[index] = updated;
        Ok(1)
    }

    fn add_foreign_key(&mut self, table: &str, column: &str, ref_table: &str, ref_column: &str, on_delete: &str) -> AppResult<()> {
        let referenced = self.tables.get(ref_table).ok_or_else(|| {
            not_found_error(format!("referenced relation \"{}\" does not exist", ref_table))
        })?;
        if referenced.column(ref_column).is_none() {
            return Err(not_found_error(format!(
                "column \"{}\" referenced in foreign key constraint does not exist",
                ref_column
            )));
        }

        let source = self.table(table)?;
        if source.column(column).is_none() {
            return Err(not_found_error(format!(
                "column \"{}\" referenced in foreign key constraint does not exist",
                column
            )));
        }
        // Existing data is validated regardless of the session check flag
        for row in &source.rows {
            if let Some(value) = row.get(column).filter(|v| !v.is_null()) {
                if !referenced.contains(ref_column, value) {
                    return Err(AppError::ConstraintFailure(format!(
                        "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                        table,
                        Statement::foreign_key_name(table, column)
                    )));
                }
            }
        }

        let target = self.table_mut(table)?;
        if let Some(col) = target.columns.iter_mut().find(|c| c.name == column) {
            col.foreign_key_table = ref_table.to_string();
            col.foreign_key_column = ref_column.to_string();
            col.on_delete_action = on_delete.to_string();
        }
        Ok(())
    }
}

/// Value a column takes when an insert or ALTER omits it
fn default_value(col: &SchemaColumn) -> Value {
    if !col.has_default() {
        return Value::Null;
    }
    let raw = col.default.split("::").next().unwrap_or_default().trim();
    if let Some(text) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::String(text.replace("''", "'"));
    }
    serde_json::from_str(&raw.to_lowercase()).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => canonical_key(x).cmp(&canonical_key(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// In-process adapter with database-per-branch isolation
pub struct MemoryAdapter {
    capabilities: Capabilities,
    databases: RwLock<BTreeMap<String, MemDatabase>>,
}

impl MemoryAdapter {
    /// An adapter holding a single empty database named `main`
    pub fn new() -> Self {
        Self::with_database("main")
    }

    pub fn with_database(name: &str) -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(name.to_string(), MemDatabase::default());
        Self {
            capabilities: Capabilities::for_provider(Provider::Memory, name),
            databases: RwLock::new(databases),
        }
    }

    /// Create an empty database, replacing any existing one
    pub async fn create_database(&self, name: &str) {
        self.databases
            .write()
            .await
            .insert(name.to_string(), MemDatabase::default());
    }

    pub async fn database_names(&self) -> Vec<String> {
        self.databases.read().await.keys().cloned().collect()
    }

    /// Whether referential integrity is enforced in a database
    pub async fn foreign_key_checks(&self, database: &str) -> Option<bool> {
        self.databases
            .read()
            .await
            .get(database)
            .map(|db| db.foreign_key_checks)
    }

    fn missing_database(name: &str) -> AppError {
        not_found_error(format!("database \"{}\" does not exist", name))
    }

    fn query(db: &MemDatabase, stmt: &Statement) -> AppResult<QueryResult> {
        match stmt {
            Statement::SelectRows {
                table,
                order_by,
                limit,
                offset,
            } => {
                let source = db.table(table)?;
                let mut rows = source.rows.clone();
                if !order_by.is_empty() {
                    rows.sort_by(|a, b| {
                        order_by
                            .iter()
                            .map(|col| compare_values(a.get(col), b.get(col)))
                            .find(|o| *o != Ordering::Equal)
                            .unwrap_or(Ordering::Equal)
                    });
                }
                let rows: Vec<Row> = rows
                    .into_iter()
                    .skip(*offset)
                    .take(limit.unwrap_or(usize::MAX))
                    .collect();
                Ok(QueryResult {
                    columns: source.columns.iter().map(|c| c.name.clone()).collect(),
                    rows,
                })
            }
            Statement::SelectExistingKeys { table, columns, keys } => {
                let source = db.table(table)?;
                let wanted: HashSet<String> = keys.iter().map(|k| canonical_tuple(k)).collect();
                let rows: Vec<Row> = source
                    .rows
                    .iter()
                    .filter(|r| wanted.contains(&row_key(r, columns)))
                    .map(|r| {
                        columns
                            .iter()
                            .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                            .collect()
                    })
                    .collect();
                Ok(QueryResult {
                    columns: columns.clone(),
                    rows,
                })
            }
            Statement::CountRows { table } => {
                let count = db.table(table)?.rows.len();
                Ok(single_value("count", Value::from(count as u64)))
            }
            Statement::ForeignKeyChecksProbe => Ok(single_value(
                "foreign_key_checks",
                Value::from(if db.foreign_key_checks { 1 } else { 0 }),
            )),
            other => Err(AppError::AdapterUnsupported(format!(
                "{} is not a query on the memory adapter",
                other.label()
            ))),
        }
    }

    fn apply(db: &mut MemDatabase, stmt: &Statement) -> AppResult<()> {
        match stmt {
            Statement::CreateEnum { name, values } => {
                if db.enums.contains_key(name) {
                    return Err(conflict_error(format!("type \"{}\" already exists", name)));
                }
                db.enums.insert(name.clone(), values.clone());
            }
            Statement::CreateTable { table, columns } => {
                if db.tables.contains_key(table) {
                    return Err(conflict_error(format!("relation \"{}\" already exists", table)));
                }
                let columns = columns
                    .iter()
                    .cloned()
                    .map(|mut c| {
                        c.foreign_key_table.clear();
                        c.foreign_key_column.clear();
                        c.on_delete_action.clear();
                        c
                    })
                    .collect();
                db.tables.insert(
                    table.clone(),
                    MemTable {
                        columns,
                        rows: Vec::new(),
                    },
                );
            }
            Statement::AddColumn { table, column } => {
                let target = db.table_mut(table)?;
                if target.column(&column.name).is_some() {
                    return Err(conflict_error(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        column.name, table
                    )));
                }
                let fill = default_value(column);
                if !column.nullable && fill.is_null() && !target.rows.is_empty() {
                    return Err(AppError::ConstraintFailure(format!(
                        "column \"{}\" of relation \"{}\" contains null values",
                        column.name, table
                    )));
                }
                for row in &mut target.rows {
                    row.insert(column.name.clone(), fill.clone());
                }
                let mut column = column.clone();
                column.foreign_key_table.clear();
                column.foreign_key_column.clear();
                target.columns.push(column);
            }
            Statement::AddForeignKey {
                table,
                column,
                ref_table,
                ref_column,
                on_delete,
                ..
            } => db.add_foreign_key(table, column, ref_table, ref_column, on_delete)?,
            Statement::InsertRows { table, columns, rows, .. } => {
                db.insert_rows(table, columns, rows)?;
            }
            Statement::UpdateRow {
                table,
                key,
                assignments,
                ..
            } => {
                db.update_row(table, key, assignments)?;
            }
            Statement::SetForeignKeyChecks(enabled) => db.foreign_key_checks = *enabled,
            other => {
                return Err(AppError::AdapterUnsupported(format!(
                    "{} is not supported on the memory adapter",
                    other.label()
                )))
            }
        }
        Ok(())
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn single_value(column: &str, value: Value) -> QueryResult {
    let mut row = Row::new();
    row.insert(column.to_string(), value);
    QueryResult {
        columns: vec![column.to_string()],
        rows: vec![row],
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn get_all_table_names(&self, ctx: &SessionContext) -> AppResult<Vec<String>> {
        ctx.run("list tables", async {
            let databases = self.databases.read().await;
            let db = databases
                .get(ctx.schema())
                .ok_or_else(|| Self::missing_database(ctx.schema()))?;
            Ok::<_, AppError>(db.tables.keys().cloned().collect())
        })
        .await
    }

    async fn get_table_columns(&self, ctx: &SessionContext, table: &str) -> AppResult<Vec<SchemaColumn>> {
        ctx.run("list columns", async {
            let databases = self.databases.read().await;
            let db = databases
                .get(ctx.schema())
                .ok_or_else(|| Self::missing_database(ctx.schema()))?;
            Ok::<_, AppError>(db.table(table)?.columns.clone())
        })
        .await
    }

    async fn get_current_enums(&self, ctx: &SessionContext) -> AppResult<Vec<SchemaEnum>> {
        ctx.run("list enums", async {
            let databases = self.databases.read().await;
            let db = databases
                .get(ctx.schema())
                .ok_or_else(|| Self::missing_database(ctx.schema()))?;
            Ok::<_, AppError>(db
                .enums
                .iter()
                .map(|(name, values)| SchemaEnum {
                    name: name.clone(),
                    values: values.clone(),
                })
                .collect())
        })
        .await
    }

    async fn execute_query(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<QueryResult> {
        ctx.run(stmt.label(), async {
            let databases = self.databases.read().await;
            let db = databases
                .get(ctx.schema())
                .ok_or_else(|| Self::missing_database(ctx.schema()))?;
            Self::query(db, stmt)
        })
        .await
    }

    async fn execute_migration(&self, ctx: &SessionContext, stmt: &Statement) -> AppResult<()> {
        ctx.run(stmt.label(), async {
            let mut databases = self.databases.write().await;
            let db = databases
                .get_mut(ctx.schema())
                .ok_or_else(|| Self::missing_database(ctx.schema()))?;
            Self::apply(db, stmt)
        })
        .await
    }

    async fn clone_schema_to_branch(&self, ctx: &SessionContext, source: &str, target: &str) -> AppResult<()> {
        ctx.run("clone database", async {
            let mut databases = self.databases.write().await;
            let mut copy = databases
                .get(source)
                .cloned()
                .ok_or_else(|| Self::missing_database(source))?;
            copy.tables.remove(MIGRATIONS_TABLE);
            copy.foreign_key_checks = true;
            databases.insert(target.to_string(), copy);
            debug!("Cloned database {} into {}", source, target);
            Ok::<_, AppError>(())
        })
        .await
    }

    async fn drop_branch_schema(&self, ctx: &SessionContext, schema: &str) -> AppResult<()> {
        ctx.run("drop database", async {
            self.databases.write().await.remove(schema);
            Ok::<_, AppError>(())
        })
        .await
    }

    async fn switch_database(&self, ctx: &SessionContext, name: &str) -> AppResult<()> {
        ctx.run("switch database", async {
            if self.databases.read().await.contains_key(name) {
                Ok(())
            } else {
                Err(Self::missing_database(name))
            }
        })
        .await
    }
}
