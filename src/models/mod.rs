//! Data models shared by the builders and the database layer.

pub mod column;
pub mod connection;
pub mod mapping;
pub mod predicate;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use column::{ColumnDescriptor, DbType, TableSchema};
pub use connection::{DatabaseType, TransactionState};
pub use mapping::{ColumnMapping, DeclaredColumn, Entity, TypeMapping};
pub use predicate::{Operator, Predicate};
pub use record::Record;
pub use value::{FromValue, Value};
