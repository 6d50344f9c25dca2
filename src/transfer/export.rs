//! Export Engine
//!
//! Walks the live schema and data of the session namespace and produces a
//! portable `ExportData` document with tables in dependency order.

use crate::config::TransferConfig;
use crate::db::{DatabaseAdapter, Row, SessionContext, Statement, MIGRATIONS_TABLE};
use crate::error::AppResult;
use crate::models::export::{
    ExportData, ExportReport, ExportTable, ExportTableSchema, ExportType, FailureKind, TransferFailure,
    EXPORT_TIMESTAMP_FORMAT, EXPORT_VERSION,
};
use crate::models::schema::{dedup_columns, referenced_tables, SchemaColumn};
use crate::transfer::sorter::{DependencyMap, DependencySorter};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ExportEngine {
    adapter: Arc<dyn DatabaseAdapter>,
    config: TransferConfig,
}

impl ExportEngine {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, config: TransferConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { adapter, config })
    }

    /// Export every table except the migration bookkeeping table.
    ///
    /// Only failing to list tables or running past the session deadline is
    /// fatal; everything else is collected in the report.
    pub async fn export_database(&self, ctx: &SessionContext, export_type: ExportType) -> AppResult<ExportReport> {
        let mut failures = Vec::new();

        let names: Vec<String> = self
            .adapter
            .get_all_table_names(ctx)
            .await?
            .into_iter()
            .filter(|t| t != MIGRATIONS_TABLE)
            .collect();
        info!("Exporting {} tables ({})", names.len(), export_type);

        let mut columns: BTreeMap<String, Vec<SchemaColumn>> = BTreeMap::new();
        let mut discovery_failed = false;
        for name in &names {
            match self.adapter.get_table_columns(ctx, name).await {
                Ok(cols) => {
                    columns.insert(name.clone(), dedup_columns(cols));
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => {
                    discovery_failed = true;
                    failures.push(TransferFailure::new(FailureKind::Table, name.as_str(), e));
                }
            }
        }

        let order = if discovery_failed {
            warn!("Dependency discovery incomplete; exporting tables unsorted");
            failures.push(TransferFailure::new(
                FailureKind::Schema,
                "dependency order",
                "foreign keys could not be read for every table; tables exported unsorted",
            ));
            names.clone()
        } else {
            let deps: DependencyMap = columns
                .iter()
                .map(|(name, cols)| (name.clone(), referenced_tables(cols)))
                .collect();
            let outcome = DependencySorter::sort(&names, &deps);
            if !outcome.is_complete() {
                failures.push(TransferFailure::new(
                    FailureKind::Schema,
                    "dependency order",
                    format!("circular foreign keys among {}", outcome.unresolved.join(", ")),
                ));
            }
            outcome.order
        };

        let mut enum_types = Vec::new();
        if export_type.includes_schema() && self.adapter.capabilities().enum_types {
            match self.adapter.get_current_enums(ctx).await {
                Ok(enums) => enum_types = enums,
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => failures.push(TransferFailure::new(FailureKind::EnumType, "*", e)),
            }
        }

        let mut tables = Vec::with_capacity(order.len());
        let mut row_counts = BTreeMap::new();
        for name in order {
            let table_columns = columns.get(&name);

            let schema = if export_type.includes_schema() {
                table_columns.map(|cols| ExportTableSchema { columns: cols.clone() })
            } else {
                None
            };

            let data = if export_type.includes_data() {
                let order_by = table_columns.map(|cols| page_order(cols)).unwrap_or_default();
                match self.export_rows(ctx, &name, order_by, &mut failures).await? {
                    Some((count, rows)) => {
                        row_counts.insert(name.clone(), count);
                        Some(rows)
                    }
                    None => None,
                }
            } else {
                None
            };

            tables.push(ExportTable { name, schema, data });
        }

        let document = ExportData {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now().format(EXPORT_TIMESTAMP_FORMAT).to_string(),
            database_provider: self.adapter.provider().as_str().to_string(),
            export_type,
            enum_types,
            tables,
        };

        info!(
            "Export finished: {} tables, {} rows, {} failures",
            document.tables.len(),
            document.total_rows(),
            failures.len()
        );
        Ok(ExportReport {
            document,
            row_counts,
            failures,
        })
    }

    /// Count first, then page through the table. A failed page triggers one
    /// whole-table fetch in its place.
    async fn export_rows(
        &self,
        ctx: &SessionContext,
        table: &str,
        order_by: Vec<String>,
        failures: &mut Vec<TransferFailure>,
    ) -> AppResult<Option<(u64, Vec<Row>)>> {
        let count = match self.adapter.get_table_row_count(ctx, table).await {
            Ok(count) => count,
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                failures.push(TransferFailure::new(FailureKind::Table, table, e));
                return Ok(None);
            }
        };

        let batch_size = self.config.export_batch_size;
        let mut rows: Vec<Row> = Vec::with_capacity(count as usize);
        let mut offset = 0usize;

        while (offset as u64) < count {
            let page = Statement::SelectRows {
                table: table.to_string(),
                order_by: order_by.clone(),
                limit: Some(batch_size),
                offset,
            };
            match self.adapter.execute_query(ctx, &page).await {
                Ok(result) => {
                    let fetched = result.rows.len();
                    rows.extend(result.rows);
                    debug!("Exported {} rows of {} (offset {})", fetched, table, offset);
                    if fetched == 0 {
                        break;
                    }
                    offset += batch_size;
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => {
                    warn!("Batch fetch of {} failed ({}); fetching whole table", table, e);
                    let whole = Statement::SelectRows {
                        table: table.to_string(),
                        order_by: order_by.clone(),
                        limit: None,
                        offset: 0,
                    };
                    match self.adapter.execute_query(ctx, &whole).await {
                        Ok(result) => {
                            rows = result.rows;
                            break;
                        }
                        Err(e) if e.is_timeout() => return Err(e),
                        Err(e) => {
                            failures.push(TransferFailure::new(FailureKind::Row, table, e));
                            return Ok(None);
                        }
                    }
                }
            }
        }

        Ok(Some((count, rows)))
    }
}

/// Stable paging order: the primary-key columns, or every column of a keyless table
fn page_order(columns: &[SchemaColumn]) -> Vec<String> {
    let key: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary)
        .map(|c| c.name.clone())
        .collect();
    if key.is_empty() {
        columns.iter().map(|c| c.name.clone()).collect()
    } else {
        key
    }
}

/// Write a document as `export_<YYYY-MM-DD_HH-MM-SS>.json` under `dir`
pub fn write_export_file(document: &ExportData, dir: impl AsRef<Path>) -> AppResult<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(format!("export_{}.json", Utc::now().format("%Y-%m-%d_%H-%M-%S")));
    fs::write(&path, serde_json::to_string_pretty(document)?)?;

    info!("Export written to {}", path.display());
    Ok(path)
}
