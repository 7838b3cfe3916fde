//! Statically declared type-to-table mappings.
//!
//! A `TypeMapping` describes how a Rust type is stored: the table, its ordered
//! columns, per-column flags and the accessor functions used to read and write
//! field values. Mappings are declared once per type through [`Entity`].

use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, DbType, Record, TableSchema, Value};

/// A type stored in one table.
///
/// ```ignore
/// impl Entity for User {
///     fn mapping() -> &'static TypeMapping<Self> {
///         static MAPPING: OnceLock<TypeMapping<User>> = OnceLock::new();
///         MAPPING.get_or_init(|| {
///             TypeMapping::new("User", "users")
///                 .column(ColumnMapping::new("id", DbType::Int64, |u: &User| u.id.into(), |u, v| {
///                     u.id = FromValue::from_value(v)?;
///                     Ok(())
///                 }).key())
///         })
///     }
/// }
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    fn mapping() -> &'static TypeMapping<Self>;
}

pub type Getter<T> = fn(&T) -> Value;
pub type Setter<T> = fn(&mut T, Value) -> DbResult<()>;

/// Attributes declared on a column. `None` falls back to the database schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclaredColumn {
    pub db_type: Option<DbType>,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub allow_null: Option<bool>,
    pub is_unique: Option<bool>,
}

pub struct ColumnMapping<T> {
    pub name: String,
    /// Type tag of the Rust field, the last-resort type of the column.
    pub type_tag: DbType,
    pub is_key: bool,
    pub ignored: bool,
    pub no_insert: bool,
    pub no_update: bool,
    pub declared: DeclaredColumn,
    pub get: Getter<T>,
    pub set: Setter<T>,
}

impl<T> ColumnMapping<T> {
    pub fn new(name: impl Into<String>, type_tag: DbType, get: Getter<T>, set: Setter<T>) -> Self {
        Self {
            name: name.into(),
            type_tag,
            is_key: false,
            ignored: false,
            no_insert: false,
            no_update: false,
            declared: DeclaredColumn::default(),
            get,
            set,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Exclude from INSERT column lists (e.g. auto-increment identities).
    pub fn no_insert(mut self) -> Self {
        self.no_insert = true;
        self
    }

    pub fn no_update(mut self) -> Self {
        self.no_update = true;
        self
    }

    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.declared.db_type = Some(db_type);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.declared.size = Some(size);
        self
    }

    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.declared.precision = Some(precision);
        self.declared.scale = Some(scale);
        self
    }

    pub fn nullable(mut self, allow_null: bool) -> Self {
        self.declared.allow_null = Some(allow_null);
        self
    }

    pub fn unique(mut self) -> Self {
        self.declared.is_unique = Some(true);
        self
    }

    /// Merge the declaration over a database-derived descriptor.
    ///
    /// Explicit declarations win, then the database value, then a default
    /// inferred from the type tag.
    pub fn merge(&self, from_db: Option<&ColumnDescriptor>) -> ColumnDescriptor {
        let d = &self.declared;
        ColumnDescriptor {
            name: from_db
                .map(|c| c.name.clone())
                .unwrap_or_else(|| self.name.clone()),
            is_key: self.is_key || from_db.is_some_and(|c| c.is_key),
            is_unique: d
                .is_unique
                .or(from_db.map(|c| c.is_unique))
                .unwrap_or(false),
            allow_null: d
                .allow_null
                .or(from_db.map(|c| c.allow_null))
                .unwrap_or(!self.is_key),
            db_type: d
                .db_type
                .or(from_db.map(|c| c.db_type).filter(|t| *t != DbType::Object))
                .unwrap_or(self.type_tag),
            size: d.size.or(from_db.map(|c| c.size)).unwrap_or(0),
            precision: d.precision.or(from_db.map(|c| c.precision)).unwrap_or(0),
            scale: d.scale.or(from_db.map(|c| c.scale)).unwrap_or(0),
        }
    }
}

impl<T> std::fmt::Debug for ColumnMapping<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnMapping")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("is_key", &self.is_key)
            .field("ignored", &self.ignored)
            .field("no_insert", &self.no_insert)
            .field("no_update", &self.no_update)
            .field("declared", &self.declared)
            .finish_non_exhaustive()
    }
}

pub struct TypeMapping<T> {
    /// Full type name, the schema cache key for this mapping.
    pub type_name: String,
    pub table: String,
    pub owner: Option<String>,
    /// Prefer declared attributes over the database even when it has a schema.
    pub override_schema: bool,
    columns: Vec<ColumnMapping<T>>,
}

impl<T> TypeMapping<T> {
    pub fn new(type_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: table.into(),
            owner: None,
            override_schema: false,
            columns: Vec::new(),
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn override_schema(mut self) -> Self {
        self.override_schema = true;
        self
    }

    pub fn column(mut self, column: ColumnMapping<T>) -> Self {
        self.columns.push(column);
        self
    }

    /// Mapped (non-ignored) columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnMapping<T>> {
        self.columns.iter().filter(|c| !c.ignored)
    }

    pub fn find(&self, name: &str) -> Option<&ColumnMapping<T>> {
        self.columns().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether `column` is a key, either declared or marked by the table schema.
    pub fn is_key(&self, column: &ColumnMapping<T>, schema: Option<&TableSchema>) -> bool {
        column.is_key
            || schema
                .and_then(|s| s.get(&column.name))
                .is_some_and(|c| c.is_key)
    }

    pub fn keys<'a>(&'a self, schema: Option<&'a TableSchema>) -> impl Iterator<Item = &'a ColumnMapping<T>> {
        self.columns().filter(move |c| self.is_key(c, schema))
    }

    /// Fail unless some column is a key, by declaration or by `schema`.
    pub fn require_keys(&self, schema: Option<&TableSchema>) -> DbResult<()> {
        if self.keys(schema).next().is_some() {
            Ok(())
        } else {
            Err(DbError::invalid_operation(format!(
                "type '{}' has no key columns",
                self.type_name
            )))
        }
    }

    pub fn is_mappable(&self) -> bool {
        !self.table.is_empty() && self.columns().next().is_some()
    }

    pub fn ensure_mappable(&self) -> DbResult<()> {
        if self.is_mappable() {
            Ok(())
        } else {
            Err(DbError::invalid_operation(format!(
                "type '{}' has no table mapping",
                self.type_name
            )))
        }
    }

    /// Schema built purely from the declarations.
    pub fn declared_schema(&self) -> TableSchema {
        self.merged_schema(None)
    }

    /// Schema with declarations merged over an introspected one.
    pub fn merged_schema(&self, from_db: Option<&TableSchema>) -> TableSchema {
        let mut schema = TableSchema::new(self.type_name.clone());
        for column in self.columns() {
            let db_column = from_db.and_then(|s| s.get(&column.name));
            schema.insert(column.merge(db_column));
        }
        schema
    }

    /// Read all mapped columns of an item into a record.
    pub fn to_record(&self, item: &T) -> Record {
        let mut record = Record::with_capacity(self.columns.len());
        for column in self.columns() {
            record.set(column.name.clone(), (column.get)(item));
        }
        record
    }

    /// Build an item from a row. Columns absent from the row keep their defaults.
    pub fn from_record(&self, record: &Record) -> DbResult<T>
    where
        T: Default,
    {
        let mut item = T::default();
        for column in self.columns() {
            if let Some(value) = record.get(&column.name) {
                (column.set)(&mut item, value.clone())?;
            }
        }
        Ok(item)
    }
}

impl<T> std::fmt::Debug for TypeMapping<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMapping")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("owner", &self.owner)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
