//! Schema introspection and caching.
//!
//! # Architecture
//!
//! A table is introspected in two steps. A zero-row probe
//! (`SELECT * FROM t WHERE 1=0`) is described by the driver, which yields the
//! column names, driver types and nullability. The catalog of the backend is
//! then queried for what the probe cannot report: keys, unique constraints,
//! size, precision and scale. Catalog queries live in the `queries` submodule.
//!
//! Results are memoized in [`SchemaCache`], keyed by table name for ad-hoc
//! tables and by type name for mapped types.

use crate::config::Dialect;
use crate::db::connection::DbConnection;
use crate::db::params::DbParameter;
use crate::db::types::parse_declared_type;
use crate::error::DbResult;
use crate::models::{ColumnDescriptor, DatabaseType, DbType, Record, TableSchema, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Memoized table schemas.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<String, Arc<TableSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key of an ad-hoc table.
    pub fn table_key(owner: Option<&str>, table: &str) -> String {
        match owner {
            Some(owner) if !owner.is_empty() => format!("{owner}.{table}"),
            _ => table.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<TableSchema>> {
        self.entries.get(key).cloned()
    }

    /// Insert a schema unless one is already cached; returns the cached entry.
    pub fn get_or_insert(&mut self, key: impl Into<String>, schema: TableSchema) -> Arc<TableSchema> {
        Arc::clone(
            self.entries
                .entry(key.into())
                .or_insert_with(|| Arc::new(schema)),
        )
    }

    /// Cache an already shared schema under another key.
    pub fn get_or_insert_shared(&mut self, key: impl Into<String>, schema: Arc<TableSchema>) -> Arc<TableSchema> {
        Arc::clone(self.entries.entry(key.into()).or_insert(schema))
    }

    /// Remove one entry, or all of them when `key` is `None`.
    pub fn clear(&mut self, key: Option<&str>) -> usize {
        match key {
            Some(key) => usize::from(self.entries.remove(key).is_some()),
            None => {
                let count = self.entries.len();
                self.entries.clear();
                count
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

mod queries {
    pub mod postgres {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            c.character_maximum_length::int4 AS character_maximum_length,
            c.numeric_precision::int4 AS numeric_precision,
            c.numeric_scale::int4 AS numeric_scale,
            c.is_nullable::text AS is_nullable,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.table_name = c.table_name
                AND tc.table_schema = c.table_schema
                AND tc.constraint_type = 'PRIMARY KEY'
                AND kcu.column_name = c.column_name
            ) AS is_key,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.table_name = c.table_name
                AND tc.table_schema = c.table_schema
                AND tc.constraint_type = 'UNIQUE'
                AND kcu.column_name = c.column_name
            ) AS is_unique
        FROM information_schema.columns c
        WHERE c.table_name = $1 AND c.table_schema = COALESCE($2, current_schema())
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CHARACTER_MAXIMUM_LENGTH,
            NUMERIC_PRECISION,
            NUMERIC_SCALE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const DESCRIBE_COLUMNS: &str =
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1)"#;

        pub const UNIQUE_COLUMNS: &str = r#"
        SELECT ii.name AS name
        FROM pragma_index_list(?1) AS il, pragma_index_info(il.name) AS ii
        WHERE il."unique" = 1
        AND il.origin <> 'pk'
        AND (SELECT COUNT(*) FROM pragma_index_info(il.name)) = 1
        "#;
    }
}

/// Introspect one table. `None` when the table cannot be probed.
pub async fn probe_table(
    conn: &mut DbConnection,
    dialect: &Dialect,
    owner: Option<&str>,
    table: &str,
    limit: Duration,
) -> DbResult<Option<TableSchema>> {
    let probe = format!("SELECT * FROM {} WHERE 1=0", dialect.quote_table(owner, table));
    let columns = match conn.describe(&probe).await {
        Ok(columns) => columns,
        Err(e) => {
            debug!(table = %table, error = %e, "Schema probe failed, continuing without schema");
            return Ok(None);
        }
    };

    let mut schema = TableSchema::new(table);
    for column in columns {
        schema.insert(column);
    }

    let db_type = conn.db_type();
    let rows = match db_type {
        DatabaseType::SQLite => {
            let params = [text_param(0, table)];
            let mut rows = conn
                .fetch_all(queries::sqlite::DESCRIBE_COLUMNS, &params, limit)
                .await?;
            let unique = conn
                .fetch_all(queries::sqlite::UNIQUE_COLUMNS, &params, limit)
                .await?;
            for row in &unique {
                if let Some(name) = text_field(row, "name") {
                    rows.push(Record::new().with("name", name).with("is_unique", true));
                }
            }
            rows
        }
        DatabaseType::PostgreSQL => {
            let params = [text_param(0, table), optional_text_param(1, owner)];
            conn.fetch_all(queries::postgres::DESCRIBE_COLUMNS, &params, limit)
                .await?
        }
        DatabaseType::MySQL => {
            let params = [text_param(0, table), optional_text_param(1, owner)];
            conn.fetch_all(queries::mysql::DESCRIBE_COLUMNS, &params, limit)
                .await?
        }
    };

    for row in &rows {
        apply_catalog_row(&mut schema, row, db_type);
    }

    debug!(table = %table, columns = schema.len(), "Schema introspected");
    Ok(Some(schema))
}

/// Merge one catalog row into the probed schema.
fn apply_catalog_row(schema: &mut TableSchema, row: &Record, db_type: DatabaseType) {
    let Some(name) = text_field(row, "name").or_else(|| text_field(row, "column_name")) else {
        return;
    };
    let Some(existing) = schema.get(&name) else {
        return;
    };
    let mut column: ColumnDescriptor = existing.clone();

    // Declared DDL type (SQLite `type`, MySQL `COLUMN_TYPE`)
    if let Some(declared) = text_field(row, "type").or_else(|| text_field(row, "column_type")) {
        let parsed = parse_declared_type(&declared, db_type);
        if column.db_type == DbType::Object || db_type == DatabaseType::SQLite {
            column.db_type = parsed.db_type;
        }
        column.size = parsed.size;
        column.precision = parsed.precision;
        column.scale = parsed.scale;
    }

    if let Some(size) = int_field(row, "character_maximum_length") {
        column.size = u32::try_from(size).unwrap_or(u32::MAX);
    }
    if let Some(precision) = int_field(row, "numeric_precision") {
        column.precision = u8::try_from(precision).unwrap_or(u8::MAX);
    }
    if let Some(scale) = int_field(row, "numeric_scale") {
        column.scale = u8::try_from(scale).unwrap_or(u8::MAX);
    }

    if let Some(pk) = int_field(row, "pk") {
        column.is_key = pk > 0;
    }
    if let Some(not_null) = int_field(row, "notnull") {
        column.allow_null = not_null == 0 && !column.is_key;
    }
    if let Some(Value::Bool(is_key)) = row.get("is_key") {
        column.is_key = *is_key;
    }
    if let Some(Value::Bool(is_unique)) = row.get("is_unique") {
        column.is_unique = *is_unique;
    }
    if let Some(nullable) = text_field(row, "is_nullable") {
        column.allow_null = nullable.eq_ignore_ascii_case("YES");
    }
    if let Some(key) = text_field(row, "column_key") {
        column.is_key = key == "PRI";
        column.is_unique = key == "UNI";
    }

    schema.insert(column);
}

fn text_param(ordinal: usize, value: &str) -> DbParameter {
    optional_text_param(ordinal, Some(value))
}

fn optional_text_param(ordinal: usize, value: Option<&str>) -> DbParameter {
    DbParameter {
        name: format!("?{}", ordinal + 1),
        ordinal,
        value: value.map(Value::from).unwrap_or_default(),
        db_type: DbType::String,
        size: value.map(|v| v.len() as u32).unwrap_or(0),
        precision: 0,
        scale: 0,
        is_nullable: true,
        source_column: None,
    }
}

fn text_field(row: &Record, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Text(s) => Some(s.clone()),
        Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

fn int_field(row: &Record, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Int(v) => Some(*v),
        Value::Float(v) => Some(*v as i64),
        Value::Bool(v) => Some(i64::from(*v)),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keeps_first_entry() {
        let mut cache = SchemaCache::new();
        let first = cache.get_or_insert("T", TableSchema::new("T"));
        let second = cache.get_or_insert(
            "T",
            TableSchema::new("T").with_column(ColumnDescriptor::new("x", DbType::Int32)),
        );
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_empty());
    }

    #[test]
    fn test_cache_clear_one_or_all() {
        let mut cache = SchemaCache::new();
        cache.get_or_insert("a", TableSchema::new("a"));
        cache.get_or_insert("b", TableSchema::new("b"));
        assert_eq!(cache.clear(Some("a")), 1);
        assert_eq!(cache.clear(Some("a")), 0);
        assert!(cache.get("b").is_some());
        assert_eq!(cache.clear(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_table_key() {
        assert_eq!(SchemaCache::table_key(None, "T"), "T");
        assert_eq!(SchemaCache::table_key(Some("dbo"), "T"), "dbo.T");
        assert_eq!(SchemaCache::table_key(Some(""), "T"), "T");
    }

    #[test]
    fn test_apply_sqlite_catalog_row() {
        let mut schema = TableSchema::new("t")
            .with_column(ColumnDescriptor::new("id", DbType::Int64))
            .with_column(ColumnDescriptor::new("price", DbType::Double));

        let row = Record::new()
            .with("name", "price")
            .with("type", "DECIMAL(10,2)")
            .with("notnull", 1)
            .with("pk", 0);
        apply_catalog_row(&mut schema, &row, DatabaseType::SQLite);
        let price = schema.get("price").unwrap();
        assert_eq!(price.db_type, DbType::Decimal);
        assert_eq!((price.precision, price.scale), (10, 2));
        assert!(!price.allow_null);

        let row = Record::new()
            .with("name", "ID")
            .with("type", "INTEGER")
            .with("notnull", 0)
            .with("pk", 1);
        apply_catalog_row(&mut schema, &row, DatabaseType::SQLite);
        let id = schema.get("id").unwrap();
        assert!(id.is_key);
        assert!(!id.allow_null);
    }

    #[test]
    fn test_apply_mysql_catalog_row() {
        let mut schema =
            TableSchema::new("t").with_column(ColumnDescriptor::new("email", DbType::String));
        let row = Record::new()
            .with("COLUMN_NAME", "email")
            .with("COLUMN_TYPE", "varchar(120)")
            .with("CHARACTER_MAXIMUM_LENGTH", 120)
            .with("IS_NULLABLE", "NO")
            .with("COLUMN_KEY", "UNI");
        apply_catalog_row(&mut schema, &row, DatabaseType::MySQL);
        let email = schema.get("email").unwrap();
        assert_eq!(email.size, 120);
        assert!(email.is_unique);
        assert!(!email.allow_null);
        assert!(!email.is_key);
    }

    #[test]
    fn test_unknown_catalog_column_ignored() {
        let mut schema = TableSchema::new("t");
        apply_catalog_row(
            &mut schema,
            &Record::new().with("name", "ghost"),
            DatabaseType::SQLite,
        );
        assert!(schema.is_empty());
    }
}
