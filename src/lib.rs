//! sqlweave
//!
//! A SQL statement builder with a schema cache and a pooled
//! connection/transaction engine for SQLite, PostgreSQL and MySQL.
//!
//! ```ignore
//! let db = Database::connect("sqlite:app.db").await?;
//! let rows = db.select("users").await?.where_eq("id", 5).execute().await?;
//! ```

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use builder::{DeleteBuilder, InsertBuilder, SelectBuilder, SqlBuilder, UpdateBuilder};
pub use config::{Capabilities, DatabaseOptions, Dialect};
pub use db::{Database, DbCommand, Transaction};
pub use error::{DbError, DbResult};
pub use models::{Entity, Record, Value};
