//! Parameter creation and driver binding.
//!
//! `ParameterBinder` turns values into [`DbParameter`]s carrying type, size,
//! precision and scale, taken from the table schema when the target column is
//! known and inferred from the value otherwise. The `bind_*` functions attach
//! those parameters to backend-specific sqlx queries in ordinal order.

use crate::config::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{DbType, TableSchema, Value};
use serde::Serialize;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use tracing::warn;

/// One bound parameter of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbParameter {
    /// Placeholder text as rendered into the statement.
    pub name: String,
    pub ordinal: usize,
    pub value: Value,
    pub db_type: DbType,
    pub size: u32,
    pub precision: u8,
    pub scale: u8,
    pub is_nullable: bool,
    /// Column the parameter was generated for, if any.
    pub source_column: Option<String>,
}

impl DbParameter {
    pub fn dump(&self) -> String {
        format!(
            "{} {:?}({}) = {}",
            self.name,
            self.db_type,
            self.size,
            self.value.to_display_literal()
        )
    }
}

/// Creates parameters for one statement.
#[derive(Debug, Clone, Copy)]
pub struct ParameterBinder<'a> {
    dialect: &'a Dialect,
    schema: Option<&'a TableSchema>,
    virtual_mode: bool,
}

impl<'a> ParameterBinder<'a> {
    pub fn new(dialect: &'a Dialect, schema: Option<&'a TableSchema>) -> Self {
        Self {
            dialect,
            schema,
            virtual_mode: false,
        }
    }

    /// Placeholders carry no value; only the schema type is recorded.
    pub fn virtual_mode(mut self, enabled: bool) -> Self {
        self.virtual_mode = enabled;
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_mode
    }

    pub fn dialect(&self) -> &'a Dialect {
        self.dialect
    }

    pub fn schema(&self) -> Option<&'a TableSchema> {
        self.schema
    }

    /// Create the parameter at `ordinal` for a value targeting `column`.
    pub fn create(&self, ordinal: usize, column: Option<&str>, value: Value) -> DbResult<DbParameter> {
        if value.is_list() {
            return Err(DbError::invalid_argument(
                column.unwrap_or("value"),
                "a collection cannot be bound to a single parameter",
            ));
        }

        let descriptor = column.and_then(|c| self.schema.and_then(|s| s.get(c)));
        let value = if self.virtual_mode { Value::Null } else { value };

        let mut parameter = match descriptor {
            Some(col) => DbParameter {
                name: self.dialect.parameter_name(ordinal),
                ordinal,
                db_type: if col.db_type == DbType::Object {
                    DbType::infer(&value)
                } else {
                    col.db_type
                },
                size: col.size,
                precision: col.precision,
                scale: col.scale,
                is_nullable: col.allow_null,
                source_column: Some(col.name.clone()),
                value,
            },
            None => {
                let db_type = DbType::infer(&value);
                let size = match &value {
                    Value::Text(s) => s.chars().count() as u32,
                    Value::Bytes(b) => b.len() as u32,
                    _ => 0,
                };
                DbParameter {
                    name: self.dialect.parameter_name(ordinal),
                    ordinal,
                    db_type,
                    size,
                    precision: 0,
                    scale: 0,
                    is_nullable: true,
                    source_column: column.map(str::to_string),
                    value,
                }
            }
        };

        if parameter.scale > parameter.precision {
            warn!(
                parameter = %parameter.name,
                precision = parameter.precision,
                scale = parameter.scale,
                "Scale exceeds precision, clamping scale to 4"
            );
            parameter.scale = 4;
        }

        Ok(parameter)
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match &param.value {
        Value::Null => match param.db_type {
            DbType::Boolean => query.bind(None::<bool>),
            DbType::Int16 | DbType::Int32 | DbType::Int64 => query.bind(None::<i64>),
            DbType::Single | DbType::Double | DbType::Decimal => query.bind(None::<f64>),
            DbType::Binary => query.bind(None::<Vec<u8>>),
            DbType::DateTime => query.bind(None::<chrono::NaiveDateTime>),
            _ => query.bind(None::<String>),
        },
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::DateTime(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
        Value::List(items) => query.bind(Json(items)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match &param.value {
        Value::Null => match param.db_type {
            DbType::Boolean => query.bind(None::<bool>),
            DbType::Int16 => query.bind(None::<i16>),
            DbType::Int32 => query.bind(None::<i32>),
            DbType::Int64 => query.bind(None::<i64>),
            DbType::Single => query.bind(None::<f32>),
            DbType::Double | DbType::Decimal => query.bind(None::<f64>),
            DbType::Binary => query.bind(None::<Vec<u8>>),
            DbType::DateTime => query.bind(None::<chrono::NaiveDateTime>),
            DbType::Date => query.bind(None::<chrono::NaiveDate>),
            DbType::Time => query.bind(None::<chrono::NaiveTime>),
            DbType::Json => query.bind(None::<Json<serde_json::Value>>),
            _ => query.bind(None::<String>),
        },
        Value::Bool(v) => query.bind(*v),
        // PostgreSQL does not coerce int8 parameters into narrower columns implicitly.
        Value::Int(v) => match param.db_type {
            DbType::Int16 => match i16::try_from(*v) {
                Ok(narrow) => query.bind(narrow),
                Err(_) => query.bind(*v),
            },
            DbType::Int32 => match i32::try_from(*v) {
                Ok(narrow) => query.bind(narrow),
                Err(_) => query.bind(*v),
            },
            _ => query.bind(*v),
        },
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::DateTime(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
        Value::List(items) => query.bind(Json(items)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match &param.value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::DateTime(v) => query.bind(*v),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
        Value::List(items) => query.bind(serde_json::to_string(items).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDescriptor;

    fn schema() -> TableSchema {
        TableSchema::new("t")
            .with_column(ColumnDescriptor::new("Id", DbType::Int32).key())
            .with_column(ColumnDescriptor::new("name", DbType::String).with_size(50))
            .with_column(ColumnDescriptor::new("price", DbType::Decimal).with_precision(10, 2))
            .with_column(ColumnDescriptor::new("odd", DbType::Decimal).with_precision(2, 3))
    }

    #[test]
    fn test_schema_driven_parameter() {
        let dialect = Dialect::default();
        let schema = schema();
        let binder = ParameterBinder::new(&dialect, Some(&schema));

        let p = binder.create(0, Some("ID"), Value::Int(5)).unwrap();
        assert_eq!(p.name, "@0");
        assert_eq!(p.db_type, DbType::Int32);
        assert!(!p.is_nullable);
        assert_eq!(p.source_column.as_deref(), Some("Id"));

        let p = binder.create(1, Some("price"), Value::Float(1.5)).unwrap();
        assert_eq!((p.precision, p.scale), (10, 2));
    }

    #[test]
    fn test_heuristic_parameter() {
        let dialect = Dialect::default();
        let binder = ParameterBinder::new(&dialect, None);

        let p = binder.create(2, Some("title"), Value::from("héllo")).unwrap();
        assert_eq!(p.name, "@2");
        assert_eq!(p.db_type, DbType::String);
        assert_eq!(p.size, 5);

        let p = binder.create(3, None, Value::Null).unwrap();
        assert_eq!(p.db_type, DbType::Object);
        assert!(p.is_nullable);
    }

    #[test]
    fn test_scale_clamp_heuristic_is_preserved() {
        let dialect = Dialect::default();
        let schema = schema();
        let binder = ParameterBinder::new(&dialect, Some(&schema));
        let p = binder.create(0, Some("odd"), Value::Float(0.5)).unwrap();
        assert_eq!(p.precision, 2);
        assert_eq!(p.scale, 4);
    }

    #[test]
    fn test_collection_rejected() {
        let dialect = Dialect::default();
        let binder = ParameterBinder::new(&dialect, None);
        let err = binder.create(0, Some("id"), Value::from([1, 2])).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
    }

    #[test]
    fn test_virtual_mode_drops_value() {
        let dialect = Dialect::default();
        let schema = schema();
        let binder = ParameterBinder::new(&dialect, Some(&schema)).virtual_mode(true);
        let p = binder.create(0, Some("name"), Value::from("x")).unwrap();
        assert_eq!(p.value, Value::Null);
        assert_eq!(p.db_type, DbType::String);
        assert_eq!(p.size, 50);
    }
}
