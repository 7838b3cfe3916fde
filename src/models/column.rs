//! Column and table schema models.

use crate::models::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logical database type of a column or bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Boolean,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Binary,
    DateTime,
    Date,
    Time,
    Guid,
    Json,
    #[default]
    Object,
}

impl DbType {
    /// Infer a type from a value when no schema information is available.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => DbType::Object,
            Value::Bool(_) => DbType::Boolean,
            Value::Int(_) => DbType::Int64,
            Value::Float(_) => DbType::Double,
            Value::Text(_) => DbType::String,
            Value::Bytes(_) => DbType::Binary,
            Value::DateTime(_) => DbType::DateTime,
            Value::Json(_) => DbType::Json,
            Value::List(items) => items
                .iter()
                .find(|v| !v.is_null())
                .map(DbType::infer)
                .unwrap_or(DbType::Object),
        }
    }

    /// Whether size is meaningful for this type.
    pub fn is_sized(&self) -> bool {
        matches!(self, DbType::String | DbType::Binary)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DbType::Int16
                | DbType::Int32
                | DbType::Int64
                | DbType::Single
                | DbType::Double
                | DbType::Decimal
        )
    }
}

/// Metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub is_key: bool,
    pub is_unique: bool,
    pub allow_null: bool,
    pub db_type: DbType,
    pub size: u32,
    pub precision: u8,
    pub scale: u8,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            name: name.into(),
            is_key: false,
            is_unique: false,
            allow_null: true,
            db_type,
            size: 0,
            precision: 0,
            scale: 0,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.allow_null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// Column metadata of one table, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name or mapped type name the schema was built for.
    pub name: String,
    columns: HashMap<String, ColumnDescriptor>,
    order: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert or replace a column. Replacing keeps the original position.
    pub fn insert(&mut self, column: ColumnDescriptor) {
        let key = column.name.to_lowercase();
        if !self.columns.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.columns.insert(key, column);
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.insert(column);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(&name.to_lowercase())
    }

    /// Columns in declaration (or probe) order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.order.iter().filter_map(|k| self.columns.get(k))
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns().filter(|c| c.is_key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let schema = TableSchema::new("users")
            .with_column(ColumnDescriptor::new("Id", DbType::Int64).key())
            .with_column(ColumnDescriptor::new("Name", DbType::String).with_size(50));

        assert_eq!(schema.get("ID").unwrap().name, "Id");
        assert_eq!(schema.get("name").unwrap().size, 50);
        assert!(schema.get("missing").is_none());
        assert_eq!(schema.key_columns().count(), 1);
    }

    #[test]
    fn test_replace_keeps_order() {
        let mut schema = TableSchema::new("t")
            .with_column(ColumnDescriptor::new("a", DbType::Int32))
            .with_column(ColumnDescriptor::new("b", DbType::Int32));
        schema.insert(ColumnDescriptor::new("A", DbType::Int64));

        let names: Vec<&str> = schema.columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b"]);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_infer_from_list_uses_first_non_null() {
        let list = Value::List(vec![Value::Null, Value::from("x")]);
        assert_eq!(DbType::infer(&list), DbType::String);
        assert_eq!(DbType::infer(&Value::Null), DbType::Object);
    }
}
