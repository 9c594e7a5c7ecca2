//! Catalog introspection for pg-runner.
//!
//! `SCHEMA_SQL` lists every user-visible column of every table, view and
//! materialized view. Callers execute it through `run_query` like any other
//! statement and can fold the rows into a [`Schema`].

use super::{QueryResult, Value};
use serde::{Deserialize, Serialize};

/// Lists `table_schema, table_name, column_name, data_type` for every column of
/// every relation outside the system schemas, ordered by schema, table and
/// column position. Array types are reported by their element type name.
pub const SCHEMA_SQL: &str = r#"
  select
    ns.nspname as table_schema,
    cls.relname as table_name,
    attr.attname as column_name,
    trim(leading '_' from tp.typname) as data_type
  from
    pg_catalog.pg_attribute as attr
    join pg_catalog.pg_class as cls on cls.oid = attr.attrelid
    join pg_catalog.pg_namespace as ns on ns.oid = cls.relnamespace
    join pg_catalog.pg_type as tp on tp.typelem = attr.atttypid
  where
    cls.relkind in ('r', 'v', 'm')
    and ns.nspname not in ('pg_catalog', 'pg_toast', 'information_schema')
    and not attr.attisdropped
    and attr.attnum > 0
  order by
    ns.nspname,
    cls.relname,
    attr.attnum
"#;

/// All schemas returned by the catalog query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub namespaces: Vec<Namespace>,
}

/// A database schema (namespace) and its relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub tables: Vec<Table>,
}

/// A table, view or materialized view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

/// A column and its base data type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Schema {
    /// Groups catalog rows into namespaces and tables.
    ///
    /// Relies on the `ORDER BY` of `SCHEMA_SQL`: consecutive rows for the same
    /// schema and table are merged, preserving column order. Rows with fewer
    /// than four values are skipped.
    pub fn from_result(result: &QueryResult) -> Self {
        let mut schema = Schema::default();

        for row in &result.rows {
            let [ns, table, column, data_type] = match row.as_slice() {
                [a, b, c, d, ..] => [a, b, c, d].map(text),
                _ => continue,
            };

            if schema.namespaces.last().map(|n| &n.name) != Some(&ns) {
                schema.namespaces.push(Namespace {
                    name: ns,
                    tables: Vec::new(),
                });
            }
            let Some(namespace) = schema.namespaces.last_mut() else {
                continue;
            };

            if namespace.tables.last().map(|t| &t.name) != Some(&table) {
                namespace.tables.push(Table {
                    name: table,
                    columns: Vec::new(),
                });
            }
            if let Some(table) = namespace.tables.last_mut() {
                table.columns.push(Column {
                    name: column,
                    data_type,
                });
            }
        }

        schema
    }

    /// Total number of tables across all namespaces.
    pub fn table_count(&self) -> usize {
        self.namespaces.iter().map(|n| n.tables.len()).sum()
    }

    /// Renders the schema as an indented tree for terminal display.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        for namespace in &self.namespaces {
            out.push_str(&namespace.name);
            out.push('\n');
            for table in &namespace.tables {
                out.push_str(&format!("  {}\n", table.name));
                for column in &table.columns {
                    out.push_str(&format!("    {} {}\n", column.name, column.data_type));
                }
            }
        }
        out
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_display_string(),
    }
}
