//! Typed statements and per-provider SQL rendering
//!
//! The engines describe what they want as `Statement` values; SQL adapters
//! render them with `SqlDialect`, the in-memory adapter interprets them.

use crate::db::{Provider, QueryResult};
use crate::error::{AppError, AppResult};
use crate::models::SchemaColumn;
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared SQL type per column name, used to render typed literals
pub type ColumnTypes = BTreeMap<String, String>;

/// A single operation sent to an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Provider-specific SQL passed through untouched
    Raw(String),
    CreateEnum {
        name: String,
        values: Vec<String>,
    },
    /// Create a table; foreign-key fields on the columns are ignored
    CreateTable {
        table: String,
        columns: Vec<SchemaColumn>,
    },
    AddColumn {
        table: String,
        column: SchemaColumn,
    },
    AddForeignKey {
        table: String,
        constraint: String,
        column: String,
        ref_table: String,
        ref_column: String,
        on_delete: String,
    },
    InsertRows {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        types: ColumnTypes,
    },
    /// Update the row matching every `(column, value)` pair of `key`
    UpdateRow {
        table: String,
        key: Vec<(String, Value)>,
        assignments: Vec<(String, Value)>,
        types: ColumnTypes,
    },
    SelectRows {
        table: String,
        order_by: Vec<String>,
        limit: Option<usize>,
        offset: usize,
    },
    /// Key tuples of `keys` already present; each tuple lines up with `columns`
    SelectExistingKeys {
        table: String,
        columns: Vec<String>,
        keys: Vec<Vec<Value>>,
    },
    CountRows {
        table: String,
    },
    /// Read whether referential integrity is currently enforced
    ForeignKeyChecksProbe,
    SetForeignKeyChecks(bool),
    /// Move an auto-increment sequence past the current maximum
    ResetSequence {
        table: String,
        column: String,
    },
}

impl Statement {
    /// Short label for logs and timeout messages
    pub fn label(&self) -> &'static str {
        match self {
            Statement::Raw(_) => "raw query",
            Statement::CreateEnum { .. } => "create enum",
            Statement::CreateTable { .. } => "create table",
            Statement::AddColumn { .. } => "add column",
            Statement::AddForeignKey { .. } => "add foreign key",
            Statement::InsertRows { .. } => "insert rows",
            Statement::UpdateRow { .. } => "update row",
            Statement::SelectRows { .. } => "select rows",
            Statement::SelectExistingKeys { .. } => "select keys",
            Statement::CountRows { .. } => "count rows",
            Statement::ForeignKeyChecksProbe => "probe foreign key checks",
            Statement::SetForeignKeyChecks(_) => "set foreign key checks",
            Statement::ResetSequence { .. } => "reset sequence",
        }
    }

    /// Constraint name used for imported foreign keys
    pub fn foreign_key_name(table: &str, column: &str) -> String {
        format!("fk_{}_{}", table, column)
    }
}

/// SQL renderer for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDialect {
    provider: Provider,
}

impl SqlDialect {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(&self, ident: &str) -> String {
        match self.provider {
            Provider::MySql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Session command binding unqualified names to `schema`
    pub fn set_search_path(&self, schema: &str) -> String {
        format!("SET search_path TO {}", self.quote_ident(schema))
    }

    /// Render a JSON value as a SQL literal
    pub fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self.provider {
                Provider::MySql | Provider::Sqlite => (if *b { "1" } else { "0" }).to_string(),
                _ => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            },
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.quote_string(s),
            // Structured values go in as their JSON text
            other => self.quote_string(&other.to_string()),
        }
    }

    /// Render a value for a column of the given declared type
    ///
    /// Postgres array columns take an `ARRAY[...]` constructor; any other
    /// structured value goes in as JSON text.
    pub fn typed_literal(&self, value: &Value, data_type: Option<&str>) -> String {
        match (value, data_type) {
            (Value::Array(items), Some(ty)) if self.provider == Provider::Postgres && is_array_type(ty) => {
                if items.is_empty() {
                    format!("'{{}}'::{}", ty)
                } else {
                    format!("{}::{}", self.array_constructor(items), ty)
                }
            }
            _ => self.literal(value),
        }
    }

    fn array_constructor(&self, items: &[Value]) -> String {
        let elements: Vec<String> = items
            .iter()
            .map(|item| match item {
                Value::Array(inner) => self.array_constructor(inner),
                other => self.literal(other),
            })
            .collect();
        format!("ARRAY[{}]", elements.join(", "))
    }

    fn quote_string(&self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        match self.provider {
            Provider::MySql => format!("'{}'", escaped.replace('\\', "\\\\")),
            _ => format!("'{}'", escaped),
        }
    }

    /// Render a statement as SQL
    pub fn render(&self, stmt: &Statement) -> AppResult<String> {
        let sql = match stmt {
            Statement::Raw(sql) => sql.clone(),
            Statement::CreateEnum { name, values } => {
                if self.provider != Provider::Postgres {
                    return Err(self.unsupported(stmt));
                }
                let labels: Vec<String> = values.iter().map(|v| self.quote_string(v)).collect();
                format!("CREATE TYPE {} AS ENUM ({})", self.quote_ident(name), labels.join(", "))
            }
            Statement::CreateTable { table, columns } => self.create_table_sql(table, columns),
            Statement::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_ident(table),
                self.column_definition(column, false)
            ),
            Statement::AddForeignKey {
                table,
                constraint,
                column,
                ref_table,
                ref_column,
                on_delete,
            } => {
                if self.provider == Provider::Sqlite {
                    return Err(self.unsupported(stmt));
                }
                let mut sql = format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
                    self.quote_ident(table),
                    self.quote_ident(constraint),
                    self.quote_ident(column),
                    self.quote_ident(ref_table),
                    self.quote_ident(ref_column),
                );
                if !on_delete.is_empty() {
                    sql.push_str(&format!(" ON DELETE {}", on_delete));
                }
                sql
            }
            Statement::InsertRows {
                table,
                columns,
                rows,
                types,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
                let values: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        let literals: Vec<String> = row
                            .iter()
                            .zip(columns)
                            .map(|(v, col)| self.typed_literal(v, types.get(col).map(String::as_str)))
                            .collect();
                        format!("({})", literals.join(", "))
                    })
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    self.quote_ident(table),
                    cols.join(", "),
                    values.join(", ")
                )
            }
            Statement::UpdateRow {
                table,
                key,
                assignments,
                types,
            } => {
                if assignments.is_empty() || key.is_empty() {
                    return Err(AppError::Validation(format!(
                        "update of '{}' needs a key and at least one column to set",
                        table
                    )));
                }
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|(col, v)| {
                        format!(
                            "{} = {}",
                            self.quote_ident(col),
                            self.typed_literal(v, types.get(col).map(String::as_str))
                        )
                    })
                    .collect();
                let filters: Vec<String> = key
                    .iter()
                    .map(|(col, v)| format!("{} = {}", self.quote_ident(col), self.literal(v)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    self.quote_ident(table),
                    sets.join(", "),
                    filters.join(" AND ")
                )
            }
            Statement::SelectRows {
                table,
                order_by,
                limit,
                offset,
            } => {
                let mut sql = format!("SELECT * FROM {}", self.quote_ident(table));
                if !order_by.is_empty() {
                    let cols: Vec<String> = order_by.iter().map(|c| self.quote_ident(c)).collect();
                    sql.push_str(&format!(" ORDER BY {}", cols.join(", ")));
                }
                if let Some(limit) = limit {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
                }
                sql
            }
            Statement::SelectExistingKeys { table, columns, keys } => {
                if columns.is_empty() {
                    return Err(AppError::Validation(format!(
                        "key lookup on '{}' names no columns",
                        table
                    )));
                }
                let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
                let select = cols.join(", ");
                if keys.is_empty() {
                    format!("SELECT {} FROM {} WHERE 1 = 0", select, self.quote_ident(table))
                } else {
                    let tuples: Vec<String> = keys
                        .iter()
                        .map(|key| {
                            let literals: Vec<String> = key.iter().map(|k| self.literal(k)).collect();
                            if literals.len() == 1 {
                                literals.join("")
                            } else {
                                format!("({})", literals.join(", "))
                            }
                        })
                        .collect();
                    let target = if cols.len() == 1 {
                        select.clone()
                    } else {
                        format!("({})", select)
                    };
                    format!(
                        "SELECT {} FROM {} WHERE {} IN ({})",
                        select,
                        self.quote_ident(table),
                        target,
                        tuples.join(", ")
                    )
                }
            }
            Statement::CountRows { table } => {
                format!("SELECT COUNT(*) AS count FROM {}", self.quote_ident(table))
            }
            Statement::ForeignKeyChecksProbe => match self.provider {
                Provider::Postgres => "SHOW session_replication_role".to_string(),
                Provider::MySql => "SELECT @@FOREIGN_KEY_CHECKS AS foreign_key_checks".to_string(),
                Provider::Sqlite => "PRAGMA foreign_keys".to_string(),
                Provider::Memory => return Err(self.unsupported(stmt)),
            },
            Statement::SetForeignKeyChecks(enabled) => match (self.provider, enabled) {
                (Provider::Postgres, true) => "SET session_replication_role = DEFAULT".to_string(),
                (Provider::Postgres, false) => "SET session_replication_role = replica".to_string(),
                (Provider::MySql, e) => format!("SET FOREIGN_KEY_CHECKS = {}", if *e { 1 } else { 0 }),
                (Provider::Sqlite, e) => format!("PRAGMA foreign_keys = {}", if *e { "ON" } else { "OFF" }),
                (Provider::Memory, _) => return Err(self.unsupported(stmt)),
            },
            Statement::ResetSequence { table, column } => {
                if self.provider != Provider::Postgres {
                    return Err(self.unsupported(stmt));
                }
                let table_ident = self.quote_ident(table);
                format!(
                    "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                    self.quote_string(&table_ident),
                    self.quote_string(column),
                    self.quote_ident(column),
                    table_ident
                )
            }
        };
        Ok(sql)
    }

    fn unsupported(&self, stmt: &Statement) -> AppError {
        AppError::AdapterUnsupported(format!("{} is not supported on {}", stmt.label(), self.provider))
    }

    fn create_table_sql(&self, table: &str, columns: &[SchemaColumn]) -> String {
        let pk: Vec<&SchemaColumn> = columns.iter().filter(|c| c.is_primary).collect();
        // SQLite only accepts AUTOINCREMENT on an inline single-column key
        let inline_pk = self.provider == Provider::Sqlite && pk.len() == 1 && pk[0].is_auto_increment;

        let mut defs: Vec<String> = columns
            .iter()
            .map(|col| format!("    {}", self.column_definition(col, inline_pk && col.is_primary)))
            .collect();

        if !pk.is_empty() && !inline_pk {
            let pk_cols: Vec<String> = pk.iter().map(|c| self.quote_ident(&c.name)).collect();
            defs.push(format!("    PRIMARY KEY ({})", pk_cols.join(", ")));
        }

        format!("CREATE TABLE {} (\n{}\n)", self.quote_ident(table), defs.join(",\n"))
    }

    fn column_definition(&self, col: &SchemaColumn, inline_pk: bool) -> String {
        let name = self.quote_ident(&col.name);
        if inline_pk {
            return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name);
        }

        let mut def = format!("{} {}", name, self.column_type(col));
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if col.is_auto_increment && self.provider == Provider::MySql {
            def.push_str(" AUTO_INCREMENT");
        }
        if col.has_default() && !col.is_auto_increment && !col.default.starts_with("nextval(") {
            def.push_str(&format!(" DEFAULT {}", col.default));
        }
        if col.is_unique && !col.is_primary {
            def.push_str(" UNIQUE");
        }
        def
    }

    fn column_type(&self, col: &SchemaColumn) -> String {
        if col.is_auto_increment && self.provider == Provider::Postgres {
            match col.data_type.to_lowercase().as_str() {
                "integer" | "int" | "int4" | "serial" => return "SERIAL".to_string(),
                "bigint" | "int8" | "bigserial" => return "BIGSERIAL".to_string(),
                "smallint" | "int2" | "smallserial" => return "SMALLSERIAL".to_string(),
                _ => {}
            }
        }
        col.data_type.clone()
    }
}

/// Whether a declared column type is a Postgres array (`text[]`, `_int4`, `ARRAY`)
fn is_array_type(data_type: &str) -> bool {
    let ty = data_type.trim();
    ty.ends_with(']') || ty.starts_with('_') || ty.eq_ignore_ascii_case("array")
}

/// Interpret the result of a `ForeignKeyChecksProbe`
pub fn foreign_key_checks_enabled(result: &QueryResult) -> bool {
    match result.first_value() {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        Some(Value::String(s)) => !matches!(
            s.trim().to_lowercase().as_str(),
            "replica" | "0" | "off" | "false"
        ),
        _ => true,
    }
}
