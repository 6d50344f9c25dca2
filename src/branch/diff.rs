//! Schema Diff Engine
//!
//! Compares two schema snapshots table by table and column by column.
//! Columns count as changed when their type or nullability differ; defaults
//! and key/uniqueness flags are not compared.

use crate::models::schema::{SchemaColumn, SchemaSnapshot, SchemaTable};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Column-level differences of one table present on both sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDiff {
    pub name: String,
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
    pub columns_changed: Vec<String>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.columns_added.is_empty() && self.columns_removed.is_empty() && self.columns_changed.is_empty()
    }
}

/// Summary statistics for the diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub tables_added: usize,
    pub tables_removed: usize,
    pub tables_modified: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub total_changes: usize,
}

/// Differences going from one snapshot to another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    /// Tables present only in the second snapshot
    pub tables_added: Vec<String>,
    /// Tables present only in the first snapshot
    pub tables_removed: Vec<String>,
    pub tables_changed: Vec<TableDiff>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.tables_added.is_empty() && self.tables_removed.is_empty() && self.tables_changed.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        let columns_added = self.tables_changed.iter().map(|t| t.columns_added.len()).sum();
        let columns_removed = self.tables_changed.iter().map(|t| t.columns_removed.len()).sum();
        let columns_modified = self.tables_changed.iter().map(|t| t.columns_changed.len()).sum();

        DiffSummary {
            tables_added: self.tables_added.len(),
            tables_removed: self.tables_removed.len(),
            tables_modified: self.tables_changed.len(),
            columns_added,
            columns_removed,
            columns_modified,
            total_changes: self.tables_added.len()
                + self.tables_removed.len()
                + columns_added
                + columns_removed
                + columns_modified,
        }
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("No differences found");
        }

        if !self.tables_added.is_empty() {
            writeln!(f, "Tables added:")?;
            for t in &self.tables_added {
                writeln!(f, "  + {}", t)?;
            }
        }

        if !self.tables_removed.is_empty() {
            writeln!(f, "Tables removed:")?;
            for t in &self.tables_removed {
                writeln!(f, "  - {}", t)?;
            }
        }

        if !self.tables_changed.is_empty() {
            writeln!(f, "Tables modified:")?;
            for t in &self.tables_changed {
                writeln!(f, "  ~ {}", t.name)?;
                for c in &t.columns_added {
                    writeln!(f, "      + column: {}", c)?;
                }
                for c in &t.columns_removed {
                    writeln!(f, "      - column: {}", c)?;
                }
                for c in &t.columns_changed {
                    writeln!(f, "      ~ column: {}", c)?;
                }
            }
        }

        Ok(())
    }
}

/// The diff engine that compares schema snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two snapshots. Identical checksums short-circuit to an empty diff.
    pub fn compare(from: &SchemaSnapshot, to: &SchemaSnapshot) -> SchemaDiff {
        if from.checksum == to.checksum {
            return SchemaDiff::default();
        }
        Self::compare_tables(&from.tables, &to.tables)
    }

    /// Compare two table lists. Output names are sorted.
    pub fn compare_tables(from: &[SchemaTable], to: &[SchemaTable]) -> SchemaDiff {
        let from_map: HashMap<&str, &SchemaTable> = from.iter().map(|t| (t.name.as_str(), t)).collect();
        let to_map: HashMap<&str, &SchemaTable> = to.iter().map(|t| (t.name.as_str(), t)).collect();

        let mut diff = SchemaDiff {
            tables_added: Self::missing_from(&to_map, &from_map),
            tables_removed: Self::missing_from(&from_map, &to_map),
            tables_changed: Vec::new(),
        };

        let mut common: Vec<&str> = from_map.keys().filter(|n| to_map.contains_key(*n)).copied().collect();
        common.sort_unstable();

        for name in common {
            let table_diff = Self::compare_columns(name, &from_map[name].columns, &to_map[name].columns);
            if !table_diff.is_empty() {
                diff.tables_changed.push(table_diff);
            }
        }

        diff
    }

    fn compare_columns(name: &str, from: &[SchemaColumn], to: &[SchemaColumn]) -> TableDiff {
        let from_map: HashMap<&str, &SchemaColumn> = from.iter().map(|c| (c.name.as_str(), c)).collect();
        let to_map: HashMap<&str, &SchemaColumn> = to.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut changed: Vec<String> = from_map
            .iter()
            .filter_map(|(col, before)| {
                let after = to_map.get(col)?;
                let differs = before.data_type != after.data_type || before.nullable != after.nullable;
                differs.then(|| col.to_string())
            })
            .collect();
        changed.sort();

        TableDiff {
            name: name.to_string(),
            columns_added: Self::missing_from(&to_map, &from_map),
            columns_removed: Self::missing_from(&from_map, &to_map),
            columns_changed: changed,
        }
    }

    /// Sorted keys of `present` that are absent from `other`
    fn missing_from<T>(present: &HashMap<&str, T>, other: &HashMap<&str, T>) -> Vec<String> {
        let other_keys: HashSet<&str> = other.keys().copied().collect();
        let mut names: Vec<String> = present
            .keys()
            .filter(|k| !other_keys.contains(*k))
            .map(|k| k.to_string())
            .collect();
        names.sort();
        names
    }
}
