//! Commands: statement text plus ordered parameters, bound to a connection.

use crate::db::database::Database;
use crate::db::params::DbParameter;
use crate::db::pool::{CommandId, PooledConnection, TransactionId};
use crate::error::{DbError, DbResult};
use crate::models::{Record, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Transaction a command last synchronized with, and the pool stamp it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionBinding {
    pub transaction: Option<TransactionId>,
    pub stamp: u64,
}

struct Attachment {
    db: Database,
    connection: Arc<PooledConnection>,
    command_id: CommandId,
    disposed: Arc<AtomicBool>,
    binding: TransactionBinding,
}

/// A statement ready for execution.
///
/// Builders fill the text and parameters through
/// [`fill_command`](crate::builder::SqlBuilder::fill_command). A detached
/// command (from [`DbCommand::new`]) can be rendered but not executed.
pub struct DbCommand {
    text: String,
    parameters: Vec<DbParameter>,
    timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    attachment: Option<Attachment>,
}

impl std::fmt::Debug for DbCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCommand")
            .field("text", &self.text)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .field("connection", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl Default for DbCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl DbCommand {
    /// A detached command.
    pub fn new() -> Self {
        Self {
            text: String::new(),
            parameters: Vec::new(),
            timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            attachment: None,
        }
    }

    pub(crate) fn attached(db: Database, connection: Arc<PooledConnection>, text: String) -> DbResult<Self> {
        let (command_id, disposed, binding) = db.with_state(|state| {
            let (id, disposed) = state.pool.register_command(connection.id)?;
            let binding = TransactionBinding {
                transaction: state.pool.active_transaction(connection.id),
                stamp: state.pool.stamp(),
            };
            Ok::<_, DbError>((id, disposed, binding))
        })??;

        Ok(Self {
            text,
            parameters: Vec::new(),
            timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            attachment: Some(Attachment {
                db,
                connection,
                command_id,
                disposed,
                binding,
            }),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn parameters(&self) -> &[DbParameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [DbParameter] {
        &mut self.parameters
    }

    pub fn add_parameter(&mut self, parameter: DbParameter) {
        self.parameters.push(parameter);
    }

    pub fn set_parameters(&mut self, parameters: Vec<DbParameter>) {
        self.parameters = parameters;
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-command timeout, overriding the database default.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.attachment.as_ref().map(|a| a.connection.id)
    }

    /// Transaction the command was last synchronized with.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.attachment.as_ref().and_then(|a| a.binding.transaction)
    }

    /// Request cancellation; the next execution fails instead of running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Text and parameters in a form suitable for error messages.
    pub fn dump(&self) -> String {
        let mut out = self.text.clone();
        for parameter in &self.parameters {
            out.push_str("\n  ");
            out.push_str(&parameter.dump());
        }
        out
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute_non_query(&mut self) -> DbResult<u64> {
        let limit = self.prepare()?;
        let connection = self.connection()?;
        let mut guard = connection.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        conn.execute(&self.text, &self.parameters, limit)
            .await
            .map_err(|e| self.wrap(e))
    }

    /// Execute a query and return all rows.
    pub async fn execute_reader(&mut self) -> DbResult<Vec<Record>> {
        let limit = self.prepare()?;
        let connection = self.connection()?;
        let mut guard = connection.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        conn.fetch_all(&self.text, &self.parameters, limit)
            .await
            .map_err(|e| self.wrap(e))
    }

    /// Execute a query and return the first column of the first row.
    pub async fn execute_scalar(&mut self) -> DbResult<Value> {
        let limit = self.prepare()?;
        let connection = self.connection()?;
        let mut guard = connection.inner.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        conn.fetch_scalar(&self.text, &self.parameters, limit)
            .await
            .map_err(|e| self.wrap(e))
    }

    fn connection(&self) -> DbResult<Arc<PooledConnection>> {
        self.attachment
            .as_ref()
            .map(|a| Arc::clone(&a.connection))
            .ok_or_else(|| DbError::invalid_operation("command is not attached to a connection"))
    }

    /// Validate the command before execution and resolve its timeout.
    fn prepare(&mut self) -> DbResult<Duration> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            return Err(DbError::invalid_operation("command was cancelled"));
        }
        let attachment = self
            .attachment
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("command is not attached to a connection"))?;
        if attachment.disposed.load(Ordering::SeqCst) {
            return Err(DbError::invalid_operation(
                "can't execute command using disposed connection",
            ));
        }

        let connection_id = attachment.connection.id;
        let binding = &mut attachment.binding;
        attachment.db.with_state(|state| {
            if state.pool.stamp() != binding.stamp {
                binding.transaction = state.pool.active_transaction(connection_id);
                binding.stamp = state.pool.stamp();
            }
        })?;
        Ok(attachment.db.options().resolve_timeout(self.timeout))
    }

    fn wrap(&self, error: DbError) -> DbError {
        match error {
            DbError::Timeout { .. } => error,
            other => DbError::query(other.to_string(), self.dump()),
        }
    }
}

fn closed() -> DbError {
    DbError::invalid_operation("connection is closed")
}

impl Drop for DbCommand {
    fn drop(&mut self) {
        if let Some(attachment) = &self.attachment {
            let connection_id = attachment.connection.id;
            let command_id = attachment.command_id;
            if let Err(e) = attachment
                .db
                .with_state(|state| state.pool.release_command(connection_id, command_id))
            {
                warn!(connection_id, command_id, error = %e, "Failed to release command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DbType;

    #[test]
    fn test_detached_command_dump() {
        let mut cmd = DbCommand::new();
        cmd.set_text("SELECT * FROM \"T\" WHERE \"id\" = @0");
        cmd.add_parameter(DbParameter {
            name: "@0".into(),
            ordinal: 0,
            value: Value::Int(5),
            db_type: DbType::Int64,
            size: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            source_column: Some("id".into()),
        });
        let dump = cmd.dump();
        assert!(dump.starts_with("SELECT * FROM"));
        assert!(dump.contains("@0 Int64(0) = 5"));
        assert_eq!(cmd.connection_id(), None);
    }

    #[tokio::test]
    async fn test_detached_command_cannot_execute() {
        let mut cmd = DbCommand::new();
        cmd.set_text("SELECT 1");
        let err = cmd.execute_scalar().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_attached_command_starts_empty_and_unregisters() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("cmd.db").display());
        let db = Database::connect(&url).await.unwrap();
        let conn = db.open_connection().await.unwrap();

        let mut cmd = conn.create_command("SELECT ?1").unwrap();
        assert!(cmd.parameters().is_empty());
        assert_eq!(cmd.timeout(), None);
        assert!(!cmd.is_cancelled());
        assert_eq!(cmd.connection_id(), Some(conn.id()));
        let count = |db: &Database, id| db.with_state(|s| s.pool.command_count(id)).unwrap();
        assert_eq!(count(&db, conn.id()), 1);

        db.bind_raw(&mut cmd, [Value::Int(7)]).unwrap();
        assert_eq!(cmd.execute_scalar().await.unwrap(), Value::Int(7));
        drop(cmd);
        assert_eq!(count(&db, conn.id()), 0);

        conn.close().await.unwrap();
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_is_checked_before_execution() {
        let mut cmd = DbCommand::new();
        cmd.cancel();
        assert!(cmd.is_cancelled());
        let err = cmd.execute_non_query().await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(!cmd.is_cancelled());
    }
}
