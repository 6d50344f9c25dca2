//! Schema snapshot models
//!
//! Tables, columns and enum types as reported by a live database. These are
//! fetched fresh for every diff or export and never cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumn {
    pub name: String,
    /// Provider-native type string
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_auto_increment: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub foreign_key_table: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub foreign_key_column: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_delete_action: String,
}

impl SchemaColumn {
    /// A nullable column with no keys or default
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            is_primary: false,
            is_unique: false,
            is_auto_increment: false,
            default: String::new(),
            foreign_key_table: String::new(),
            foreign_key_column: String::new(),
            on_delete_action: String::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key_table = table.into();
        self.foreign_key_column = column.into();
        self
    }

    pub fn has_foreign_key(&self) -> bool {
        !self.foreign_key_table.is_empty()
    }

    pub fn has_default(&self) -> bool {
        !self.default.is_empty()
    }
}

/// Table representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaTable {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
}

impl SchemaTable {
    pub fn new(name: impl Into<String>, columns: Vec<SchemaColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Tables this table references through foreign keys
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        referenced_tables(&self.columns)
    }
}

/// Tables referenced by a set of columns
pub fn referenced_tables(columns: &[SchemaColumn]) -> BTreeSet<String> {
    columns
        .iter()
        .filter(|c| c.has_foreign_key())
        .map(|c| c.foreign_key_table.clone())
        .collect()
}

/// Keep the first column of each name, preserving order
pub fn dedup_columns(columns: Vec<SchemaColumn>) -> Vec<SchemaColumn> {
    let mut seen = BTreeSet::new();
    columns
        .into_iter()
        .filter(|c| seen.insert(c.name.clone()))
        .collect()
}

/// Provider-level enumerated type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEnum {
    pub name: String,
    pub values: Vec<String>,
}

/// Complete schema snapshot of one namespace at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub schema: String,
    pub captured_at: DateTime<Utc>,
    pub tables: Vec<SchemaTable>,
    pub checksum: String,
}

impl SchemaSnapshot {
    pub fn new(schema: impl Into<String>, tables: Vec<SchemaTable>) -> Self {
        let checksum = Self::compute_checksum(&tables);
        Self {
            schema: schema.into(),
            captured_at: Utc::now(),
            tables,
            checksum,
        }
    }

    /// Compute checksum over table names and the column properties the diff compares
    pub fn compute_checksum(tables: &[SchemaTable]) -> String {
        let mut hasher = Sha256::new();

        // Hash tables in sorted order for consistency
        let mut table_strs: Vec<String> = tables
            .iter()
            .flat_map(|t| {
                let mut cols: Vec<String> = t
                    .columns
                    .iter()
                    .map(|c| format!("{}.{}:{}:{}", t.name, c.name, c.data_type, c.nullable))
                    .collect();
                cols.push(t.name.clone());
                cols
            })
            .collect();
        table_strs.sort();

        for t in &table_strs {
            hasher.update(t.as_bytes());
            hasher.update(b"\n");
        }

        format!("{:x}", hasher.finalize())
    }
}
