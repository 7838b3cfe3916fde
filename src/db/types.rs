//! Database-agnostic type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. [`categorize_type`] classifies a backend type name into a [`DbType`]
//! 2. Database-specific decoders extract the column value into a [`Value`]

use crate::models::{DatabaseType, DbType, Record, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Classify a database type name into a [`DbType`].
pub fn categorize_type(type_name: &str, db: DatabaseType) -> DbType {
    let lower = type_name.to_lowercase();
    let base = lower.split('(').next().unwrap_or_default().trim();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if base.contains("decimal") || base.contains("numeric") || base == "money" {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && base == "numeric" {
            return DbType::Double;
        }
        return DbType::Decimal;
    }

    if base == "bool" || base == "boolean" || (db == DatabaseType::MySQL && base == "bit") {
        return DbType::Boolean;
    }

    if (base.contains("int") && !base.contains("point") && !base.contains("interval"))
        || base.contains("serial")
        || base.contains("tiny")
    {
        return match base {
            "int2" | "smallint" | "smallserial" | "tinyint" => DbType::Int16,
            "int4" | "int" | "mediumint" | "serial" => DbType::Int32,
            // SQLite INTEGER is a 64-bit rowid
            "integer" if db != DatabaseType::SQLite => DbType::Int32,
            _ => DbType::Int64,
        };
    }

    if base == "real" && db != DatabaseType::SQLite || base == "float4" {
        return DbType::Single;
    }

    if base.contains("float") || base.contains("double") || base == "real" || base == "float8" {
        return DbType::Double;
    }

    if base == "json" || base == "jsonb" {
        return DbType::Json;
    }

    if base == "uuid" || base == "uniqueidentifier" {
        return DbType::Guid;
    }

    if base.contains("blob") || base.contains("binary") || base == "bytea" {
        return DbType::Binary;
    }

    if base.starts_with("timestamp") || base == "datetime" {
        return DbType::DateTime;
    }

    if base == "date" {
        return DbType::Date;
    }

    if base == "time" || base == "timetz" {
        return DbType::Time;
    }

    if base.contains("char") || base.contains("text") || base.contains("clob") || base == "string" {
        return DbType::String;
    }

    DbType::Object
}

/// Declared type of a column as written in DDL, e.g. `VARCHAR(50)` or `DECIMAL(10,2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredType {
    pub db_type: DbType,
    pub size: u32,
    pub precision: u8,
    pub scale: u8,
}

/// Parse a DDL type declaration into its category and facets.
pub fn parse_declared_type(declared: &str, db: DatabaseType) -> DeclaredType {
    let db_type = categorize_type(declared, db);
    let facets: Vec<u32> = declared
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(inner, _)| {
            inner
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    let mut result = DeclaredType {
        db_type,
        size: 0,
        precision: 0,
        scale: 0,
    };
    match (db_type, facets.as_slice()) {
        (DbType::Decimal | DbType::Double | DbType::Single, [p, rest @ ..]) => {
            result.precision = u8::try_from(*p).unwrap_or(u8::MAX);
            result.scale = rest
                .first()
                .map(|s| u8::try_from(*s).unwrap_or(u8::MAX))
                .unwrap_or(0);
        }
        (_, [size, ..]) => result.size = *size,
        _ => {}
    }
    result
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl From<RawDecimal> for Value {
    /// Parsed as a float when representable, otherwise kept verbatim.
    fn from(raw: RawDecimal) -> Self {
        raw.0
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Text(raw.0))
    }
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Converts backend rows into [`Record`]s.
pub trait RowToRecord {
    fn to_record(&self) -> Record;

    /// First column of the row, `Value::Null` for an empty row.
    fn first_value(&self) -> Value;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }

    fn first_value(&self) -> Value {
        self.columns()
            .first()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                mysql::decode_column(self, 0, category)
            })
            .unwrap_or_default()
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }

    fn first_value(&self) -> Value {
        self.columns()
            .first()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                postgres::decode_column(self, 0, category)
            })
            .unwrap_or_default()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::SQLite);
                (col.name().to_string(), sqlite::decode_column(self, idx, category))
            })
            .collect()
    }

    fn first_value(&self) -> Value {
        self.columns()
            .first()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                sqlite::decode_column(self, 0, category)
            })
            .unwrap_or_default()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: DbType) -> Value {
        match category {
            DbType::Decimal => decode_decimal(row, idx),
            DbType::Int16 | DbType::Int32 | DbType::Int64 => decode_integer(row, idx),
            DbType::Boolean => decode_boolean(row, idx),
            DbType::Single | DbType::Double => decode_float(row, idx),
            DbType::Binary => decode_binary(row, idx),
            DbType::Json => decode_json(row, idx),
            DbType::DateTime => decode_datetime(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => v.into(),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        // Try unsigned types
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(v.to_string()));
        }
        Value::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            Ok(Some(v)) => Value::DateTime(v),
            Ok(None) => Value::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: DbType) -> Value {
        match category {
            DbType::Decimal => decode_decimal(row, idx),
            DbType::Int16 | DbType::Int32 | DbType::Int64 => decode_integer(row, idx),
            DbType::Boolean => decode_boolean(row, idx),
            DbType::Single | DbType::Double => decode_float(row, idx),
            DbType::Binary => decode_binary(row, idx),
            DbType::Json => decode_json(row, idx),
            DbType::DateTime => decode_datetime(row, idx),
            DbType::Date => decode_date(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => v.into(),
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return Value::Int(v);
        }
        Value::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null)
    }

    fn decode_datetime(row: &PgRow, idx: usize) -> Value {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return Value::DateTime(v);
        }
        row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::DateTime(v.naive_utc()))
            .unwrap_or(Value::Null)
    }

    fn decode_date(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: DbType) -> Value {
        match category {
            DbType::Int16 | DbType::Int32 | DbType::Int64 => decode_integer(row, idx),
            DbType::Boolean => decode_boolean(row, idx),
            DbType::Single | DbType::Double | DbType::Decimal => decode_float(row, idx),
            DbType::Binary => decode_binary(row, idx),
            DbType::DateTime => decode_datetime(row, idx),
            DbType::Json => decode_json(row, idx),
            // Expressions such as COUNT(*) report no declared type
            DbType::Object => decode_dynamic(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(Some(v)) => Value::Int(v),
            Ok(None) => Value::Null,
            Err(_) => decode_dynamic(row, idx),
        }
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(Some(v)) => Value::Float(v),
            Ok(None) => Value::Null,
            Err(_) => decode_dynamic(row, idx),
        }
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_datetime(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            Ok(Some(v)) => Value::DateTime(v),
            Ok(None) => Value::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_json(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => serde_json::from_str(&v)
                .map(Value::Json)
                .unwrap_or(Value::Text(v)),
            _ => Value::Null,
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => Value::Text(v),
            Ok(None) => Value::Null,
            Err(_) => decode_dynamic(row, idx),
        }
    }

    /// Decode by storage class when the declared type is missing or misleading.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return Value::Text(v);
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }
}
