//! Connection, transaction and command pools.
//!
//! [`PoolState`] is the bookkeeping shared by everything that uses one
//! database instance: the open physical connections, the stack of native
//! transactions on each of them, the commands created against each of them
//! and the builders that are still alive. It is plain synchronous data kept
//! behind the database's single mutex; physical I/O happens afterwards on the
//! connection's own async lock.
//!
//! Every structural change to a transaction stack or a connection advances
//! the pool stamp, which lets commands detect that their cached transaction
//! binding is stale.

use crate::db::connection::DbConnection;
use crate::db::database::Database;
use crate::db::transaction::Transaction;
use crate::db::DbCommand;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub type ConnectionId = u64;
pub type TransactionId = u64;
pub type CommandId = u64;
pub type BuilderId = u64;

/// A physical connection registered in the pool.
///
/// `None` means the connection is currently closed.
#[derive(Debug)]
pub struct PooledConnection {
    pub id: ConnectionId,
    pub(crate) inner: tokio::sync::Mutex<Option<DbConnection>>,
}

impl PooledConnection {
    pub(crate) fn new(id: ConnectionId, connection: Option<DbConnection>) -> Self {
        Self {
            id,
            inner: tokio::sync::Mutex::new(connection),
        }
    }
}

/// One native transaction on a connection's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub id: TransactionId,
    /// Position on the stack; 0 is the outermost transaction.
    pub depth: usize,
    pub started_at: DateTime<Utc>,
}

/// Outcome of planning a `BEGIN` on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginPlan {
    /// Start a native transaction at this depth.
    Native { depth: usize },
    /// Single-transaction mode with a transaction already active.
    Nested,
}

/// What was left on a connection when it was removed from the pool.
#[derive(Debug)]
pub struct RemovedConnection {
    pub connection: Arc<PooledConnection>,
    /// Remaining transactions, innermost first.
    pub transactions: Vec<TransactionEntry>,
    pub commands: usize,
}

#[derive(Debug)]
struct PooledCommand {
    id: CommandId,
    disposed: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct ConnectionSlot {
    connection: Option<Arc<PooledConnection>>,
    transactions: Vec<TransactionEntry>,
    commands: Vec<PooledCommand>,
}

#[derive(Debug, Default)]
pub struct PoolState {
    slots: BTreeMap<ConnectionId, ConnectionSlot>,
    builders: HashSet<BuilderId>,
    stamp: u64,
    next_id: u64,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a connection, transaction, command or builder.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    fn advance_stamp(&mut self) {
        self.stamp += 1;
        debug!(stamp = self.stamp, "Pool stamp advanced");
    }

    pub fn register_connection(&mut self, connection: Arc<PooledConnection>) {
        self.slots.insert(
            connection.id,
            ConnectionSlot {
                connection: Some(connection),
                ..ConnectionSlot::default()
            },
        );
    }

    /// The earliest registered connection, the shared one in single-connection mode.
    pub fn first_connection(&self) -> Option<Arc<PooledConnection>> {
        self.slots.values().find_map(|slot| slot.connection.clone())
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.slots.contains_key(&connection)
    }

    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, connection: ConnectionId, what: &str) -> DbResult<&ConnectionSlot> {
        self.slots.get(&connection).ok_or_else(|| disposed(what))
    }

    fn slot_mut(&mut self, connection: ConnectionId, what: &str) -> DbResult<&mut ConnectionSlot> {
        self.slots.get_mut(&connection).ok_or_else(|| disposed(what))
    }

    /// Decide how a new transaction on `connection` starts.
    pub fn plan_begin(&self, connection: ConnectionId, single_transaction: bool) -> DbResult<BeginPlan> {
        let depth = self.slot(connection, "transaction")?.transactions.len();
        if single_transaction && depth > 0 {
            Ok(BeginPlan::Nested)
        } else {
            Ok(BeginPlan::Native { depth })
        }
    }

    /// Record a native transaction that was started at `depth`.
    pub fn push_transaction(&mut self, connection: ConnectionId, depth: usize) -> DbResult<TransactionId> {
        let id = self.next_id();
        let slot = self.slot_mut(connection, "transaction")?;
        if slot.transactions.len() != depth {
            return Err(DbError::transaction(format!(
                "transaction stack changed while beginning (expected depth {depth}, found {})",
                slot.transactions.len()
            )));
        }
        slot.transactions.push(TransactionEntry {
            id,
            depth,
            started_at: Utc::now(),
        });
        self.advance_stamp();
        Ok(id)
    }

    /// Depth of `transaction`, which must be the innermost one of its connection.
    pub fn innermost_depth(&self, connection: ConnectionId, transaction: TransactionId) -> DbResult<usize> {
        let slot = self.slot(connection, "transaction")?;
        match slot.transactions.last() {
            Some(top) if top.id == transaction => Ok(top.depth),
            Some(_) => Err(DbError::transaction(
                "only the innermost transaction of a connection can be completed",
            )),
            None => Err(DbError::transaction("transaction is no longer active")),
        }
    }

    /// Pop the innermost transaction of a connection.
    pub fn pop_transaction(
        &mut self,
        connection: ConnectionId,
        transaction: TransactionId,
    ) -> DbResult<TransactionEntry> {
        self.innermost_depth(connection, transaction)?;
        let slot = self.slot_mut(connection, "transaction")?;
        let entry = slot
            .transactions
            .pop()
            .ok_or_else(|| DbError::transaction("transaction is no longer active"))?;
        self.advance_stamp();
        Ok(entry)
    }

    /// Innermost active transaction of a connection.
    pub fn active_transaction(&self, connection: ConnectionId) -> Option<TransactionId> {
        self.slots
            .get(&connection)
            .and_then(|slot| slot.transactions.last())
            .map(|entry| entry.id)
    }

    pub fn transaction_depth(&self, connection: ConnectionId) -> usize {
        self.slots
            .get(&connection)
            .map(|slot| slot.transactions.len())
            .unwrap_or(0)
    }

    /// Register a command against a pooled connection.
    pub fn register_command(&mut self, connection: ConnectionId) -> DbResult<(CommandId, Arc<AtomicBool>)> {
        let id = self.next_id();
        let slot = self.slot_mut(connection, "command")?;
        let disposed = Arc::new(AtomicBool::new(false));
        slot.commands.push(PooledCommand {
            id,
            disposed: Arc::clone(&disposed),
        });
        Ok((id, disposed))
    }

    pub fn release_command(&mut self, connection: ConnectionId, command: CommandId) {
        if let Some(slot) = self.slots.get_mut(&connection) {
            slot.commands.retain(|c| c.id != command);
        }
    }

    pub fn command_count(&self, connection: ConnectionId) -> usize {
        self.slots
            .get(&connection)
            .map(|slot| slot.commands.len())
            .unwrap_or(0)
    }

    /// Remove a connection, disposing its commands.
    ///
    /// Returns `None` when the connection was already removed.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Option<RemovedConnection> {
        let slot = self.slots.remove(&connection)?;
        for command in &slot.commands {
            command.disposed.store(true, Ordering::SeqCst);
        }
        self.advance_stamp();
        let mut transactions = slot.transactions;
        transactions.reverse();
        Some(RemovedConnection {
            connection: slot.connection?,
            transactions,
            commands: slot.commands.len(),
        })
    }

    /// Remove every connection, in registration order.
    pub fn drain(&mut self) -> Vec<RemovedConnection> {
        let ids: Vec<ConnectionId> = self.slots.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.remove_connection(id))
            .collect()
    }

    pub fn register_builder(&mut self) -> BuilderId {
        let id = self.next_id();
        self.builders.insert(id);
        id
    }

    pub fn release_builder(&mut self, builder: BuilderId) {
        self.builders.remove(&builder);
    }

    pub fn remaining_builders(&self) -> usize {
        self.builders.len()
    }

    /// Forget every registered builder; returns their ids in creation order.
    pub fn clear_builders(&mut self) -> Vec<BuilderId> {
        let mut leaked: Vec<BuilderId> = self.builders.drain().collect();
        leaked.sort_unstable();
        leaked
    }
}

fn disposed(what: &str) -> DbError {
    DbError::invalid_operation(format!("can't create {what} using disposed connection"))
}

/// Handle to a pooled connection.
///
/// In single-connection mode every handle shares one physical connection and
/// [`close`](Connection::close) leaves it open. Otherwise closing disposes the
/// connection's commands, rolls back its open transactions and closes it.
/// Dropping an open handle schedules the same cleanup on the runtime.
pub struct Connection {
    db: Database,
    pooled: Arc<PooledConnection>,
    released: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.pooled.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(db: Database, pooled: Arc<PooledConnection>) -> Self {
        Self {
            db,
            pooled,
            released: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.pooled.id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) fn pooled(&self) -> &Arc<PooledConnection> {
        &self.pooled
    }

    /// Whether the connection is still registered in the pool.
    pub fn is_open(&self) -> bool {
        self.db
            .with_state(|state| state.pool.contains(self.pooled.id))
            .unwrap_or(false)
    }

    /// Create a command bound to this connection and its active transaction.
    pub fn create_command(&self, text: impl Into<String>) -> DbResult<DbCommand> {
        DbCommand::attached(self.db.clone(), Arc::clone(&self.pooled), text.into())
    }

    /// Begin a transaction on this connection.
    pub async fn begin_transaction(&self) -> DbResult<Transaction> {
        self.db.begin_on(Arc::clone(&self.pooled), None).await
    }

    /// Close the connection (no-op in single-connection mode).
    pub async fn close(mut self) -> DbResult<()> {
        self.released = true;
        self.db.dispose_connection(self.pooled.id).await
    }

    /// Give up ownership without closing; the caller disposes the connection.
    pub(crate) fn detach(mut self) -> (Database, ConnectionId) {
        self.released = true;
        (self.db.clone(), self.pooled.id)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.released || self.db.single_connection() {
            return;
        }

        let db = self.db.clone();
        let connection_id = self.pooled.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = db.dispose_connection(connection_id).await {
                        warn!(connection_id, error = %e, "Failed to dispose dropped connection");
                    }
                    warn!(
                        connection_id,
                        "Connection disposed via Drop - consider using explicit close()"
                    );
                });
            }
            Err(_) => {
                warn!(connection_id, "Connection dropped outside a runtime, not disposed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_connection() -> (PoolState, ConnectionId) {
        let mut state = PoolState::new();
        let id = state.next_id();
        state.register_connection(Arc::new(PooledConnection::new(id, None)));
        (state, id)
    }

    #[test]
    fn test_begin_plan_and_stack() {
        let (mut state, conn) = state_with_connection();
        assert_eq!(state.plan_begin(conn, false).unwrap(), BeginPlan::Native { depth: 0 });

        let outer = state.push_transaction(conn, 0).unwrap();
        assert_eq!(state.plan_begin(conn, false).unwrap(), BeginPlan::Native { depth: 1 });
        assert_eq!(state.plan_begin(conn, true).unwrap(), BeginPlan::Nested);

        let inner = state.push_transaction(conn, 1).unwrap();
        assert_eq!(state.active_transaction(conn), Some(inner));

        // LIFO: the outer transaction cannot complete first
        assert!(state.pop_transaction(conn, outer).is_err());
        assert_eq!(state.pop_transaction(conn, inner).unwrap().depth, 1);
        assert_eq!(state.pop_transaction(conn, outer).unwrap().depth, 0);
        assert_eq!(state.active_transaction(conn), None);
    }

    #[test]
    fn test_stamp_advances_on_structural_changes() {
        let (mut state, conn) = state_with_connection();
        let s0 = state.stamp();
        let tx = state.push_transaction(conn, 0).unwrap();
        let s1 = state.stamp();
        assert!(s1 > s0);
        state.pop_transaction(conn, tx).unwrap();
        assert!(state.stamp() > s1);

        // Commands don't change transaction bindings
        let s2 = state.stamp();
        state.register_command(conn).unwrap();
        assert_eq!(state.stamp(), s2);
    }

    #[test]
    fn test_disposed_connection_rejects_commands_and_transactions() {
        let (mut state, conn) = state_with_connection();
        let (_, flag) = state.register_command(conn).unwrap();
        state.push_transaction(conn, 0).unwrap();
        state.push_transaction(conn, 1).unwrap();

        let removed = state.remove_connection(conn).unwrap();
        assert_eq!(removed.commands, 1);
        assert_eq!(
            removed.transactions.iter().map(|t| t.depth).collect::<Vec<_>>(),
            vec![1, 0]
        );
        assert!(flag.load(Ordering::SeqCst));

        let err = state.register_command(conn).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid operation: can't create command using disposed connection"
        );
        let err = state.plan_begin(conn, false).unwrap_err();
        assert!(err.to_string().contains("can't create transaction using disposed connection"));
        assert!(state.remove_connection(conn).is_none());
    }

    #[test]
    fn test_push_rejects_stale_depth() {
        let (mut state, conn) = state_with_connection();
        state.push_transaction(conn, 0).unwrap();
        assert!(matches!(
            state.push_transaction(conn, 0),
            Err(DbError::Transaction { .. })
        ));
    }

    #[test]
    fn test_first_connection_and_drain() {
        let mut state = PoolState::new();
        for _ in 0..3 {
            let id = state.next_id();
            state.register_connection(Arc::new(PooledConnection::new(id, None)));
        }
        let first = state.first_connection().unwrap();
        assert_eq!(state.drain().len(), 3);
        assert_eq!(state.connection_count(), 0);
        assert!(first.id > 0);
    }

    #[test]
    fn test_builder_registry() {
        let mut state = PoolState::new();
        let a = state.register_builder();
        let b = state.register_builder();
        state.release_builder(a);
        assert_eq!(state.remaining_builders(), 1);
        state.release_builder(b);
        assert_eq!(state.remaining_builders(), 0);
    }

    #[test]
    fn test_clear_builders_returns_leaked_ids() {
        let mut state = PoolState::new();
        let a = state.register_builder();
        let b = state.register_builder();
        let c = state.register_builder();
        state.release_builder(b);
        assert_eq!(state.clear_builders(), vec![a, c]);
        assert_eq!(state.remaining_builders(), 0);
        assert!(state.clear_builders().is_empty());
    }
}
