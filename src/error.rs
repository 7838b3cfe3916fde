//! Error types for the access layer.
//!
//! Usage errors (bad operator/value combinations, unsupported capabilities,
//! unmappable types, reuse of disposed connections) are raised immediately.
//! Driver failures are wrapped together with the rendered command so the
//! failing statement can be diagnosed from the error alone.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Invalid argument '{argument}': {message}")]
    InvalidArgument { argument: String, message: String },

    #[error("Not supported: {feature} is not supported by this database")]
    NotSupported { feature: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Query failed: {message}\n{command}")]
    Query { message: String, command: String },

    #[error("Bulk operation failed: {message}\n{command}")]
    Bulk { message: String, command: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl DbError {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }

    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self::NotSupported {
            feature: feature.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Wrap a failure together with the dump of the command that caused it.
    pub fn query(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            command: command.into(),
        }
    }

    pub fn bulk(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Bulk {
            message: message.into(),
            command: command.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Usage errors are programmer mistakes and fail before any I/O happens.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation { .. }
                | Self::InvalidArgument { .. }
                | Self::NotSupported { .. }
                | Self::Config { .. }
        )
    }

    /// Check if this error is transient. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::database(
                format!("Column index {} out of bounds (len: {})", index, len),
                None,
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::database(
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => {
                DbError::database(format!("Decode error: {}", source), None)
            }
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Reopen the connection",
            ),
            _ => DbError::database(format!("Unknown database error: {}", err), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_query_error_carries_command() {
        let err = DbError::query("near \"FORM\": syntax error", "SELECT * FORM \"T\"");
        let text = err.to_string();
        assert!(text.contains("syntax error"));
        assert!(text.contains("SELECT * FORM \"T\""));
    }

    #[test]
    fn test_not_supported_display() {
        let err = DbError::not_supported("TOP");
        assert_eq!(
            err.to_string(),
            "Not supported: TOP is not supported by this database"
        );
    }

    #[test]
    fn test_usage_errors() {
        assert!(DbError::invalid_operation("x").is_usage_error());
        assert!(DbError::invalid_argument("value", "x").is_usage_error());
        assert!(DbError::not_supported("LIMIT").is_usage_error());
        assert!(!DbError::database("x", None).is_usage_error());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::transaction("disposed").is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Database { sql_state: None, .. }));
    }
}
