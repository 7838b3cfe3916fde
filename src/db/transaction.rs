//! Transaction handles.
//!
//! A [`Transaction`] is either operational, owning one native transaction on
//! its connection's stack, or non-operational, created while single-transaction
//! mode already had a transaction running. Non-operational transactions share
//! the outer transaction's connection and their commit/rollback do nothing,
//! so the outermost scope decides the outcome.

use crate::builder::SqlBuilder;
use crate::db::command::DbCommand;
use crate::db::connection::TransactionStatement;
use crate::db::database::Database;
use crate::db::pool::{Connection, ConnectionId, PooledConnection, TransactionId};
use crate::error::{DbError, DbResult};
use crate::models::{Entity, Record, TransactionState, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Transaction {
    db: Database,
    pooled: Arc<PooledConnection>,
    /// `None` for a non-operational transaction.
    id: Option<TransactionId>,
    state: TransactionState,
    /// Connection opened for this transaction, closed when it completes.
    owned: Option<Connection>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection", &self.pooled.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        db: Database,
        pooled: Arc<PooledConnection>,
        id: Option<TransactionId>,
        owned: Option<Connection>,
    ) -> Self {
        Self {
            db,
            pooled,
            id,
            state: TransactionState::Active,
            owned,
        }
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.pooled.id
    }

    /// Whether commit/rollback act on a native transaction.
    pub fn is_operational(&self) -> bool {
        self.id.is_some()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a command bound to this transaction's connection.
    pub fn create_command(&self, text: impl Into<String>) -> DbResult<DbCommand> {
        DbCommand::attached(self.db.clone(), Arc::clone(&self.pooled), text.into())
    }

    /// Begin a transaction nested inside this one.
    pub async fn begin_transaction(&self) -> DbResult<Transaction> {
        self.ensure_active()?;
        self.db.begin_on(Arc::clone(&self.pooled), None).await
    }

    /// Execute a raw statement inside the transaction.
    pub async fn execute(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<u64> {
        self.ensure_active()?;
        let mut cmd = self.create_command(sql)?;
        self.db.bind_raw(&mut cmd, args)?;
        cmd.execute_non_query().await
    }

    pub async fn query(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<Vec<Record>> {
        self.ensure_active()?;
        let mut cmd = self.create_command(sql)?;
        self.db.bind_raw(&mut cmd, args)?;
        cmd.execute_reader().await
    }

    pub async fn scalar(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<Value> {
        self.ensure_active()?;
        let mut cmd = self.create_command(sql)?;
        self.db.bind_raw(&mut cmd, args)?;
        cmd.execute_scalar().await
    }

    /// Execute a builder inside the transaction.
    pub async fn execute_builder<B: SqlBuilder + ?Sized>(&self, builder: &B) -> DbResult<u64> {
        self.ensure_active()?;
        let schema = self.db.schema_for(builder.core()).await?;
        let mut cmd = self.create_command(String::new())?;
        builder.fill_command_with(&mut cmd, schema.as_deref())?;
        cmd.execute_non_query().await
    }

    pub async fn query_builder<B: SqlBuilder + ?Sized>(&self, builder: &B) -> DbResult<Vec<Record>> {
        self.ensure_active()?;
        let schema = self.db.schema_for(builder.core()).await?;
        let mut cmd = self.create_command(String::new())?;
        builder.fill_command_with(&mut cmd, schema.as_deref())?;
        cmd.execute_reader().await
    }

    pub async fn insert<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.db.insert_into_entity(item).await?;
        self.execute_builder(&builder).await
    }

    pub async fn update<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.db.update_entity(item).await?;
        self.execute_builder(&builder).await
    }

    pub async fn delete<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.db.delete_entity(item).await?;
        self.execute_builder(&builder).await
    }

    /// Commit. Non-operational transactions only change state.
    pub async fn commit(mut self) -> DbResult<()> {
        self.ensure_active()?;
        if let Some(id) = self.id {
            self.db
                .complete_transaction(&self.pooled, id, TransactionStatement::Commit)
                .await?;
            info!(transaction_id = id, connection_id = self.pooled.id, "Transaction committed");
        }
        self.state = TransactionState::Committed;
        self.release_owned().await
    }

    /// Roll back. Non-operational transactions only change state.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.ensure_active()?;
        let result = match self.id {
            Some(id) => self
                .db
                .complete_transaction(&self.pooled, id, TransactionStatement::Rollback)
                .await
                .map(|_| info!(transaction_id = id, connection_id = self.pooled.id, "Transaction rolled back")),
            None => Ok(()),
        };
        // The stack entry is gone even when the native rollback failed
        self.state = TransactionState::RolledBack;
        result?;
        self.release_owned().await
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(DbError::transaction(format!(
                "transaction is already {:?}",
                self.state
            )))
        }
    }

    async fn release_owned(&mut self) -> DbResult<()> {
        match self.owned.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let owned = self.owned.take().map(Connection::detach);
        let pending = self.id.filter(|_| self.state.is_active());
        if pending.is_none() && owned.is_none() {
            return;
        }

        let db = self.db.clone();
        let pooled = Arc::clone(&self.pooled);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(id) = pending {
                        if let Err(e) = db
                            .complete_transaction(&pooled, id, TransactionStatement::Rollback)
                            .await
                        {
                            warn!(transaction_id = id, error = %e, "Failed to roll back dropped transaction");
                        }
                        warn!(
                            transaction_id = id,
                            connection_id = pooled.id,
                            "Transaction rolled back via Drop - consider explicit commit() or rollback()"
                        );
                    }
                    if let Some((db, connection_id)) = owned {
                        if let Err(e) = db.dispose_connection(connection_id).await {
                            warn!(connection_id, error = %e, "Failed to dispose transaction connection");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(
                    transaction_id = ?pending,
                    connection_id = self.pooled.id,
                    "Transaction dropped outside a runtime, left to the connection"
                );
            }
        }
    }
}
