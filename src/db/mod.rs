//! Database layer.
//!
//! This module provides:
//! - Physical connections over sqlx, dispatched per backend
//! - Connection/transaction/command pools with nested transactions
//! - Schema introspection and caching
//! - Parameter creation and binding
//! - Row decoding into [`Record`](crate::models::Record)
//! - Bulk insert/update/delete of mapped types
//! - The [`Database`] facade tying them together

pub mod bulk;
pub mod command;
pub mod connection;
pub mod database;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod schema;
pub mod transaction;
pub mod types;

pub use bulk::{BulkOperation, CompiledCache, CompiledCommand};
pub use command::DbCommand;
pub use connection::DbConnection;
pub use database::Database;
pub use params::{DbParameter, ParameterBinder};
pub use pool::{Connection, ConnectionId, TransactionId};
pub use schema::SchemaCache;
pub use transaction::Transaction;
