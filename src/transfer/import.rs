//! Import Engine
//!
//! Loads an `ExportData` document into the session namespace in four phases:
//! enum types, tables and missing columns (without foreign keys), row upserts
//! with referential checks suspended, then the collected foreign keys.
//! Only an invalid document or an expired deadline aborts the run; every
//! other failure is recorded in the `ImportResult`.

use crate::config::TransferConfig;
use crate::db::{canonical_key, canonical_tuple, ColumnTypes, DatabaseAdapter, Row, SessionContext, Statement};
use crate::error::{AppError, AppResult};
use crate::models::export::{ExportData, ExportTable, FailureKind, ImportResult, TransferFailure};
use crate::models::schema::{dedup_columns, referenced_tables, SchemaColumn};
use crate::transfer::guard::ForeignKeyGuard;
use crate::transfer::sorter::{DependencyMap, DependencySorter};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Foreign key held back until all tables exist
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingForeignKey {
    table: String,
    column: String,
    ref_table: String,
    ref_column: String,
    on_delete: String,
}

impl PendingForeignKey {
    fn from_column(table: &str, col: &SchemaColumn) -> Option<Self> {
        if !col.has_foreign_key() {
            return None;
        }
        Some(Self {
            table: table.to_string(),
            column: col.name.clone(),
            ref_table: col.foreign_key_table.clone(),
            ref_column: col.foreign_key_column.clone(),
            on_delete: col.on_delete_action.clone(),
        })
    }

    fn statement(&self) -> Statement {
        Statement::AddForeignKey {
            table: self.table.clone(),
            constraint: Statement::foreign_key_name(&self.table, &self.column),
            column: self.column.clone(),
            ref_table: self.ref_table.clone(),
            ref_column: self.ref_column.clone(),
            on_delete: self.on_delete.clone(),
        }
    }
}

/// Copy of a column with its foreign-key fields cleared
fn without_foreign_key(col: &SchemaColumn) -> SchemaColumn {
    let mut col = col.clone();
    col.foreign_key_table.clear();
    col.foreign_key_column.clear();
    col.on_delete_action.clear();
    col
}

fn primary_key(columns: &[SchemaColumn]) -> Vec<&SchemaColumn> {
    columns.iter().filter(|c| c.is_primary).collect()
}

fn column_types(columns: &[SchemaColumn]) -> ColumnTypes {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.data_type.clone()))
        .collect()
}

/// Key tuple of a row, or `None` when any key column is missing or null
fn key_values(row: &Row, key: &[String]) -> Option<Vec<Value>> {
    key.iter()
        .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
        .collect()
}

/// Column names across all rows, in first-seen order
fn row_columns(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn row_values(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Per-table state shared by the phases
struct ImportPlan {
    /// Document tables in dependency order
    order: Vec<String>,
    /// Tables that exist in the target right now
    available: HashSet<String>,
    foreign_keys: Vec<PendingForeignKey>,
}

pub struct ImportEngine {
    adapter: Arc<dyn DatabaseAdapter>,
    config: TransferConfig,
}

impl ImportEngine {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, config: TransferConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { adapter, config })
    }

    pub async fn import_database(&self, ctx: &SessionContext, doc: &ExportData) -> AppResult<ImportResult> {
        doc.ensure_importable()?;
        info!(
            "Importing {} tables ({}, exported {} from {})",
            doc.tables.len(),
            doc.export_type,
            doc.exported_at,
            doc.database_provider
        );

        let mut result = ImportResult::default();

        self.create_enum_types(ctx, doc, &mut result).await?;
        let mut plan = self.plan(ctx, doc, &mut result).await?;
        self.create_tables(ctx, doc, &mut plan, &mut result).await?;

        if doc.export_type.includes_data() {
            self.load_data(ctx, doc, &plan, &mut result).await?;
        }

        self.add_foreign_keys(ctx, &plan, &mut result).await?;

        info!(
            "Import finished: {} tables created, {} updated, {} columns added, {} rows inserted, {} rows updated, {} failures",
            result.tables_created,
            result.tables_updated,
            result.columns_added,
            result.rows_inserted,
            result.rows_updated,
            result.failures.len()
        );
        Ok(result)
    }

    /// Phase 0: enum types. An existing type counts as success.
    async fn create_enum_types(&self, ctx: &SessionContext, doc: &ExportData, result: &mut ImportResult) -> AppResult<()> {
        if doc.enum_types.is_empty() {
            return Ok(());
        }
        if !self.adapter.capabilities().enum_types {
            for enum_type in &doc.enum_types {
                result.record(TransferFailure::new(
                    FailureKind::EnumType,
                    enum_type.name.as_str(),
                    format!("enum types are not supported by {}", self.adapter.provider()),
                ));
            }
            return Ok(());
        }

        for enum_type in &doc.enum_types {
            let stmt = Statement::CreateEnum {
                name: enum_type.name.clone(),
                values: enum_type.values.clone(),
            };
            match self.adapter.execute_migration(ctx, &stmt).await {
                Ok(()) => result.enum_types_created += 1,
                Err(e) if e.is_already_exists() => debug!("Enum type {} already exists", enum_type.name),
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => result.record(TransferFailure::new(FailureKind::EnumType, enum_type.name.as_str(), e)),
            }
        }
        Ok(())
    }

    /// Order document tables by their foreign keys. Tables without a schema
    /// block fall back to the live foreign keys of the existing table.
    async fn plan(&self, ctx: &SessionContext, doc: &ExportData, result: &mut ImportResult) -> AppResult<ImportPlan> {
        let available: HashSet<String> = self.adapter.get_all_table_names(ctx).await?.into_iter().collect();

        let mut names = Vec::with_capacity(doc.tables.len());
        let mut deps = DependencyMap::new();
        for table in &doc.tables {
            names.push(table.name.clone());
            let refs: BTreeSet<String> = match &table.schema {
                Some(schema) => referenced_tables(&schema.columns),
                None if available.contains(&table.name) => {
                    match self.adapter.get_table_columns(ctx, &table.name).await {
                        Ok(cols) => referenced_tables(&cols),
                        Err(e) if e.is_timeout() => return Err(e),
                        Err(e) => {
                            result.record(TransferFailure::new(FailureKind::Table, table.name.as_str(), e));
                            BTreeSet::new()
                        }
                    }
                }
                None => BTreeSet::new(),
            };
            deps.insert(table.name.clone(), refs);
        }

        let outcome = DependencySorter::sort(&names, &deps);
        if !outcome.is_complete() {
            result.record(TransferFailure::new(
                FailureKind::Schema,
                "dependency order",
                format!("circular foreign keys among {}", outcome.unresolved.join(", ")),
            ));
        }

        Ok(ImportPlan {
            order: outcome.order,
            available,
            foreign_keys: Vec::new(),
        })
    }

    /// Phase 1: create missing tables without foreign keys, add missing
    /// columns to existing ones, and collect the foreign keys to add later.
    async fn create_tables(
        &self,
        ctx: &SessionContext,
        doc: &ExportData,
        plan: &mut ImportPlan,
        result: &mut ImportResult,
    ) -> AppResult<()> {
        for name in plan.order.clone() {
            let Some(table) = doc.table(&name) else {
                continue;
            };
            let Some(schema) = &table.schema else {
                continue;
            };
            let columns = dedup_columns(schema.columns.clone());

            if plan.available.contains(&name) {
                self.add_missing_columns(ctx, &name, &columns, plan, result).await?;
                continue;
            }

            let stmt = Statement::CreateTable {
                table: name.clone(),
                columns: columns.iter().map(without_foreign_key).collect(),
            };
            match self.adapter.execute_migration(ctx, &stmt).await {
                Ok(()) => {
                    result.tables_created += 1;
                    plan.available.insert(name.clone());
                    plan.foreign_keys
                        .extend(columns.iter().filter_map(|c| PendingForeignKey::from_column(&name, c)));
                    debug!("Created table {}", name);
                }
                Err(e) if e.is_already_exists() => {
                    plan.available.insert(name.clone());
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => result.record(TransferFailure::new(FailureKind::Table, name.as_str(), e)),
            }
        }
        Ok(())
    }

    async fn add_missing_columns(
        &self,
        ctx: &SessionContext,
        table: &str,
        columns: &[SchemaColumn],
        plan: &mut ImportPlan,
        result: &mut ImportResult,
    ) -> AppResult<()> {
        let live: HashSet<String> = match self.adapter.get_table_columns(ctx, table).await {
            Ok(cols) => cols.into_iter().map(|c| c.name).collect(),
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                result.record(TransferFailure::new(FailureKind::Table, table, e));
                return Ok(());
            }
        };

        let mut added = 0;
        for col in columns.iter().filter(|c| !live.contains(&c.name)) {
            let mut column = without_foreign_key(col);
            column.is_primary = false;
            // Existing rows have no value for it
            if !column.has_default() {
                column.nullable = true;
            }

            let stmt = Statement::AddColumn {
                table: table.to_string(),
                column,
            };
            let target = format!("{}.{}", table, col.name);
            match self.adapter.execute_migration(ctx, &stmt).await {
                Ok(()) => {
                    added += 1;
                    plan.foreign_keys.extend(PendingForeignKey::from_column(table, col));
                }
                Err(e) if e.is_already_exists() => {}
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => result.record(TransferFailure::new(FailureKind::Column, target, e)),
            }
        }

        if added > 0 {
            result.columns_added += added;
            result.tables_updated += 1;
            debug!("Added {} columns to {}", added, table);
        }
        Ok(())
    }

    /// Phase 2: upsert rows with referential checks suspended
    async fn load_data(&self, ctx: &SessionContext, doc: &ExportData, plan: &ImportPlan, result: &mut ImportResult) -> AppResult<()> {
        let guard = match ForeignKeyGuard::acquire(self.adapter.as_ref(), ctx).await {
            Ok(guard) => Some(guard),
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                result.record(TransferFailure::new(
                    FailureKind::Session,
                    "foreign key checks",
                    format!("could not suspend checks, loading with checks enabled: {}", e),
                ));
                None
            }
        };

        let loaded = self.load_tables(ctx, doc, plan, result).await;

        if let Some(guard) = guard {
            if let Err(e) = guard.restore().await {
                result.record(TransferFailure::new(FailureKind::Session, "foreign key checks", e));
            }
        }
        let sequences = loaded?;

        if self.adapter.capabilities().sequences {
            for (table, column) in sequences {
                let stmt = Statement::ResetSequence {
                    table: table.clone(),
                    column: column.clone(),
                };
                match self.adapter.execute_query(ctx, &stmt).await {
                    Ok(_) => debug!("Reset sequence of {}.{}", table, column),
                    Err(e) if e.is_timeout() => return Err(e),
                    Err(e) => result.record(TransferFailure::new(FailureKind::Table, format!("{}.{}", table, column), e)),
                }
            }
        }
        Ok(())
    }

    /// Load every table in plan order; returns auto-increment keys that received explicit values
    async fn load_tables(
        &self,
        ctx: &SessionContext,
        doc: &ExportData,
        plan: &ImportPlan,
        result: &mut ImportResult,
    ) -> AppResult<Vec<(String, String)>> {
        let mut sequences = Vec::new();

        for name in &plan.order {
            let Some(table) = doc.table(name) else {
                continue;
            };
            if table.rows().is_empty() {
                continue;
            }
            if !plan.available.contains(name) {
                result.record(TransferFailure::new(
                    FailureKind::Table,
                    name.as_str(),
                    format!("table does not exist; {} rows skipped", table.rows().len()),
                ));
                continue;
            }

            let layout = self.table_layout(ctx, table, result).await?;
            let key = primary_key(&layout);
            let key_names: Vec<String> = key.iter().map(|c| c.name.clone()).collect();
            self.upsert_rows(ctx, table, &key_names, &column_types(&layout), result)
                .await?;

            sequences.extend(
                key.iter()
                    .filter(|c| c.is_auto_increment)
                    .map(|c| (name.clone(), c.name.clone())),
            );
        }
        Ok(sequences)
    }

    /// Columns of a document table: its schema block, or the live table
    async fn table_layout(&self, ctx: &SessionContext, table: &ExportTable, result: &mut ImportResult) -> AppResult<Vec<SchemaColumn>> {
        if let Some(schema) = &table.schema {
            return Ok(schema.columns.clone());
        }
        match self.adapter.get_table_columns(ctx, &table.name).await {
            Ok(cols) => Ok(cols),
            Err(e) if e.is_timeout() => Err(e),
            Err(e) => {
                result.record(TransferFailure::new(FailureKind::Table, table.name.as_str(), e));
                Ok(Vec::new())
            }
        }
    }

    async fn upsert_rows(
        &self,
        ctx: &SessionContext,
        table: &ExportTable,
        key: &[String],
        types: &ColumnTypes,
        result: &mut ImportResult,
    ) -> AppResult<()> {
        let rows = table.rows();
        let columns = row_columns(rows);

        if key.is_empty() {
            result.record(TransferFailure::new(
                FailureKind::Table,
                table.name.as_str(),
                "no primary key; rows inserted without existence checks",
            ));
            let all: Vec<&Row> = rows.iter().collect();
            return self
                .insert_rows(ctx, &table.name, &columns, types, &all, key, result)
                .await;
        }

        let existing = self.existing_keys(ctx, &table.name, key, rows, result).await?;

        let (updates, inserts): (Vec<&Row>, Vec<&Row>) = rows.iter().partition(|row| {
            key_values(row, key).is_some_and(|values| existing.contains(&canonical_tuple(&values)))
        });

        self.insert_rows(ctx, &table.name, &columns, types, &inserts, key, result)
            .await?;

        for row in updates {
            let key_pairs: Vec<(String, Value)> = key
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            let assignments: Vec<(String, Value)> = row
                .iter()
                .filter(|(col, _)| !key.contains(col))
                .map(|(col, v)| (col.clone(), v.clone()))
                .collect();
            if assignments.is_empty() {
                result.rows_updated += 1;
                continue;
            }

            let stmt = Statement::UpdateRow {
                table: table.name.clone(),
                key: key_pairs,
                assignments,
                types: types.clone(),
            };
            match self.adapter.execute_migration(ctx, &stmt).await {
                Ok(()) => result.rows_updated += 1,
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => result.record(TransferFailure::new(FailureKind::Row, row_target(&table.name, key, row), e)),
            }
        }

        debug!("Loaded {} rows into {}", rows.len(), table.name);
        Ok(())
    }

    /// Canonical key tuples of `rows` already present in the target, checked in chunks
    async fn existing_keys(
        &self,
        ctx: &SessionContext,
        table: &str,
        key: &[String],
        rows: &[Row],
        result: &mut ImportResult,
    ) -> AppResult<HashSet<String>> {
        let keys: Vec<Vec<Value>> = rows.iter().filter_map(|r| key_values(r, key)).collect();

        let mut existing = HashSet::new();
        for chunk in keys.chunks(self.config.key_check_batch_size) {
            let stmt = Statement::SelectExistingKeys {
                table: table.to_string(),
                columns: key.to_vec(),
                keys: chunk.to_vec(),
            };
            match self.adapter.execute_query(ctx, &stmt).await {
                Ok(found) => {
                    existing.extend(found.rows.iter().filter_map(|r| key_values(r, key)).map(|k| canonical_tuple(&k)));
                }
                Err(e) if e.is_timeout() => return Err(e),
                // Unchecked keys are treated as new; duplicates then fail per row
                Err(e) => result.record(TransferFailure::new(FailureKind::Row, table, e)),
            }
        }
        Ok(existing)
    }

    /// Chunked multi-row inserts; a failed chunk is retried row by row
    async fn insert_rows(
        &self,
        ctx: &SessionContext,
        table: &str,
        columns: &[String],
        types: &ColumnTypes,
        rows: &[&Row],
        key: &[String],
        result: &mut ImportResult,
    ) -> AppResult<()> {
        for chunk in rows.chunks(self.config.insert_batch_size) {
            let stmt = Statement::InsertRows {
                table: table.to_string(),
                columns: columns.to_vec(),
                rows: chunk.iter().map(|r| row_values(r, columns)).collect(),
                types: types.clone(),
            };
            match self.adapter.execute_migration(ctx, &stmt).await {
                Ok(()) => {
                    result.rows_inserted += chunk.len();
                    continue;
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => debug!("Batch insert into {} failed ({}); retrying row by row", table, e),
            }

            for row in chunk {
                let stmt = Statement::InsertRows {
                    table: table.to_string(),
                    columns: columns.to_vec(),
                    rows: vec![row_values(row, columns)],
                    types: types.clone(),
                };
                match self.adapter.execute_migration(ctx, &stmt).await {
                    Ok(()) => result.rows_inserted += 1,
                    Err(e) if e.is_timeout() => return Err(e),
                    Err(e) => result.record(TransferFailure::new(FailureKind::Row, row_target(table, key, row), e)),
                }
            }
        }
        Ok(())
    }

    /// Phase 3: add the collected foreign keys
    async fn add_foreign_keys(&self, ctx: &SessionContext, plan: &ImportPlan, result: &mut ImportResult) -> AppResult<()> {
        for fk in &plan.foreign_keys {
            if !plan.available.contains(&fk.ref_table) {
                debug!(
                    "Skipping foreign key {}.{}: table {} was never created",
                    fk.table, fk.column, fk.ref_table
                );
                continue;
            }
            match self.adapter.execute_migration(ctx, &fk.statement()).await {
                Ok(()) => debug!("Added foreign key {}.{} -> {}", fk.table, fk.column, fk.ref_table),
                Err(e) if e.is_already_exists() => {}
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => result.record(TransferFailure::new(
                    FailureKind::Constraint,
                    format!("{}.{}", fk.table, fk.column),
                    e,
                )),
            }
        }
        Ok(())
    }
}

fn row_target(table: &str, key: &[String], row: &Row) -> String {
    let pairs: Vec<String> = key
        .iter()
        .filter_map(|k| row.get(k).map(|v| format!("{}={}", k, canonical_key(v))))
        .collect();
    if pairs.is_empty() {
        table.to_string()
    } else {
        format!("{} ({})", table, pairs.join(", "))
    }
}

/// Read and validate an export document from disk
pub fn read_export_file(path: impl AsRef<Path>) -> AppResult<ExportData> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    let document: ExportData = serde_json::from_str(&data)
        .map_err(|e| AppError::Validation(format!("Invalid import data in {}: {}", path.display(), e)))?;
    document.ensure_importable()?;
    Ok(document)
}
