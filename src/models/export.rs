//! Export document and transfer result models
//!
//! `ExportData` is the portable interchange artifact between the export and
//! import engines. Once written it is treated as immutable input.

use crate::db::Row;
use crate::error::{validation_error, AppError};
use crate::models::schema::{SchemaColumn, SchemaEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Document format version written by this crate
pub const EXPORT_VERSION: &str = "1.0";

/// Format of `exportedAt` (always UTC)
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What an export carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    SchemaOnly,
    DataOnly,
    Complete,
}

impl ExportType {
    pub fn includes_schema(&self) -> bool {
        matches!(self, ExportType::SchemaOnly | ExportType::Complete)
    }

    pub fn includes_data(&self) -> bool {
        matches!(self, ExportType::DataOnly | ExportType::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::SchemaOnly => "schema_only",
            ExportType::DataOnly => "data_only",
            ExportType::Complete => "complete",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_only" => Ok(ExportType::SchemaOnly),
            "data_only" => Ok(ExportType::DataOnly),
            "complete" => Ok(ExportType::Complete),
            other => Err(validation_error(format!(
                "Invalid export type '{}'. Use: schema_only, data_only, or complete",
                other
            ))),
        }
    }
}

/// Schema block of an exported table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTableSchema {
    pub columns: Vec<SchemaColumn>,
}

impl ExportTableSchema {
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// One table in the export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ExportTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
}

impl ExportTable {
    pub fn rows(&self) -> &[Row] {
        self.data.as_deref().unwrap_or(&[])
    }
}

/// The portable export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    #[serde(default)]
    #[validate(length(min = 1, message = "missing version"))]
    pub version: String,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub database_provider: String,
    pub export_type: ExportType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_types: Vec<SchemaEnum>,
    #[serde(default)]
    #[validate(length(min = 1, message = "no tables"))]
    pub tables: Vec<ExportTable>,
}

impl ExportData {
    /// Reject documents that cannot be imported at all
    pub fn ensure_importable(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| validation_error(format!("Invalid import data: {}", e)))
    }

    pub fn table(&self, name: &str) -> Option<&ExportTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows().len()).sum()
    }
}

/// Kind of item a transfer failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EnumType,
    Table,
    Column,
    Row,
    Constraint,
    Session,
    Schema,
}

impl FailureKind {
    fn label(&self) -> &'static str {
        match self {
            FailureKind::EnumType => "enum type",
            FailureKind::Table => "table",
            FailureKind::Column => "column",
            FailureKind::Row => "row",
            FailureKind::Constraint => "constraint",
            FailureKind::Session => "session",
            FailureKind::Schema => "schema",
        }
    }
}

/// A non-fatal, per-item failure collected during export or import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailure {
    pub kind: FailureKind,
    pub target: String,
    pub message: String,
}

impl TransferFailure {
    pub fn new(kind: FailureKind, target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind.label(), self.target, self.message)
    }
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub tables_created: usize,
    pub tables_updated: usize,
    pub columns_added: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub enum_types_created: usize,
    pub failures: Vec<TransferFailure>,
}

impl ImportResult {
    /// Human-readable error strings
    pub fn errors(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, failure: TransferFailure) {
        tracing::warn!("Import: {}", failure);
        self.failures.push(failure);
    }
}

/// Outcome of an export run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub document: ExportData,
    /// Live row counts per exported table
    pub row_counts: BTreeMap<String, u64>,
    pub failures: Vec<TransferFailure>,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
