//! Database instance: pools, schema cache and the execution facade.
//!
//! # Architecture
//!
//! A [`Database`] is a cheap handle (`Arc`) around one engine state guarded by
//! a single mutex: the connection/transaction/command pools and the schema
//! cache. The mutex only covers structural changes and is never held across
//! an `.await`. Physical I/O goes through each connection's own async lock.
//!
//! Every facade call acquires a connection, runs one command and releases the
//! connection again. In single-connection mode all calls share one physical
//! connection, so they also run inside whatever transaction is active on it.

use crate::builder::{DeleteBuilder, InsertBuilder, SelectBuilder, SelectOutput, SqlBuilder, UpdateBuilder};
use crate::config::{Capabilities, DatabaseOptions, Dialect};
use crate::db::bulk::{self, BulkOperation, CompiledCache};
use crate::db::command::DbCommand;
use crate::db::connection::{DbConnection, TransactionStatement};
use crate::db::params::ParameterBinder;
use crate::db::pool::{BeginPlan, BuilderId, Connection, ConnectionId, PoolState, PooledConnection, RemovedConnection};
use crate::db::schema::{probe_table, SchemaCache};
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{Entity, Record, TableSchema, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Mutable state shared by every handle of one database instance.
#[derive(Debug, Default)]
pub struct EngineState {
    pub pool: PoolState,
    pub schema: SchemaCache,
    pub compiled: CompiledCache,
}

struct DatabaseInner {
    options: DatabaseOptions,
    state: Mutex<EngineState>,
}

/// Handle to one database instance. Clones share pools and caches.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_type", &self.inner.options.db_type)
            .field("connection", &self.inner.options.masked_connection_string())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a database from options without opening a connection.
    pub fn with_options(options: DatabaseOptions) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                options,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Parse a connection URL and verify that a connection can be opened.
    pub async fn connect(url: &str) -> DbResult<Self> {
        let db = Self::with_options(DatabaseOptions::parse(url)?);
        let connection = db.open_connection().await?;
        connection.close().await?;
        info!(
            db_type = %db.inner.options.db_type,
            connection = %db.inner.options.masked_connection_string(),
            "Database ready"
        );
        Ok(db)
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn dialect(&self) -> &Dialect {
        &self.inner.options.dialect
    }

    pub fn single_connection(&self) -> bool {
        self.options().capabilities().contains(Capabilities::SINGLE_CONNECTION)
    }

    pub fn single_transaction(&self) -> bool {
        self.options().capabilities().contains(Capabilities::SINGLE_TRANSACTION)
    }

    /// Run `f` on the engine state under the instance lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> DbResult<R> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| DbError::invalid_operation("database state lock poisoned"))?;
        Ok(f(&mut state))
    }

    /// Number of pooled connections.
    pub fn open_connections(&self) -> usize {
        self.with_state(|state| state.pool.connection_count()).unwrap_or(0)
    }

    /// Number of builders created through this database that are still alive.
    pub fn remaining_builders(&self) -> usize {
        self.with_state(|state| state.pool.remaining_builders()).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Connections and transactions
    // ------------------------------------------------------------------

    /// Acquire a connection.
    ///
    /// In single-connection mode the pooled connection is reused (and reopened
    /// when closed); otherwise a fresh physical connection is opened.
    pub async fn open_connection(&self) -> DbResult<Connection> {
        if self.single_connection() {
            if let Some(pooled) = self.with_state(|state| state.pool.first_connection())? {
                self.ensure_open(&pooled).await?;
                return Ok(Connection::new(self.clone(), pooled));
            }
        }

        let raw = DbConnection::open(&self.inner.options).await?;
        let single = self.single_connection();
        let (pooled, surplus) = self.with_state(move |state| {
            if single {
                if let Some(existing) = state.pool.first_connection() {
                    return (existing, Some(raw));
                }
            }
            let id = state.pool.next_id();
            let pooled = Arc::new(PooledConnection::new(id, Some(raw)));
            state.pool.register_connection(Arc::clone(&pooled));
            (pooled, None)
        })?;

        // Lost a race for the single connection
        if let Some(raw) = surplus {
            raw.close().await?;
            self.ensure_open(&pooled).await?;
        } else {
            debug!(connection_id = pooled.id, "Connection registered");
        }
        Ok(Connection::new(self.clone(), pooled))
    }

    async fn ensure_open(&self, pooled: &PooledConnection) -> DbResult<()> {
        let mut guard = pooled.inner.lock().await;
        if guard.is_none() {
            *guard = Some(DbConnection::open(&self.inner.options).await?);
            info!(connection_id = pooled.id, "Connection reopened");
        }
        Ok(())
    }

    /// Begin a transaction on a connection of its own.
    ///
    /// The connection is closed when the transaction completes. In
    /// single-connection mode the shared connection is used instead.
    pub async fn begin_transaction(&self) -> DbResult<Transaction> {
        let connection = self.open_connection().await?;
        let pooled = Arc::clone(connection.pooled());
        self.begin_on(pooled, Some(connection)).await
    }

    pub(crate) async fn begin_on(
        &self,
        pooled: Arc<PooledConnection>,
        owned: Option<Connection>,
    ) -> DbResult<Transaction> {
        let single_transaction = self.single_transaction();
        let limit = self.options().resolve_timeout(None);
        let mut guard = pooled.inner.lock().await;

        let plan = self.with_state(|state| state.pool.plan_begin(pooled.id, single_transaction))??;
        let depth = match plan {
            BeginPlan::Nested => {
                drop(guard);
                debug!(connection_id = pooled.id, "Joining the active transaction");
                return Ok(Transaction::new(self.clone(), pooled, None, owned));
            }
            BeginPlan::Native { depth } => depth,
        };

        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        conn.transaction(TransactionStatement::Begin, depth, limit).await?;
        let id = match self.with_state(|state| state.pool.push_transaction(pooled.id, depth)) {
            Ok(Ok(id)) => id,
            Ok(Err(e)) | Err(e) => {
                if let Err(rollback) = conn.transaction(TransactionStatement::Rollback, depth, limit).await {
                    warn!(connection_id = pooled.id, error = %rollback, "Failed to undo unregistered transaction");
                }
                return Err(e);
            }
        };
        drop(guard);

        info!(transaction_id = id, connection_id = pooled.id, depth, "Transaction started");
        Ok(Transaction::new(self.clone(), pooled, Some(id), owned))
    }

    /// Commit or roll back the innermost transaction of a connection.
    ///
    /// A failed commit leaves the transaction on the stack; a rollback always
    /// pops it.
    pub(crate) async fn complete_transaction(
        &self,
        pooled: &Arc<PooledConnection>,
        id: crate::db::pool::TransactionId,
        statement: TransactionStatement,
    ) -> DbResult<()> {
        let limit = self.options().resolve_timeout(None);
        let mut guard = pooled.inner.lock().await;
        let depth = self.with_state(|state| state.pool.innermost_depth(pooled.id, id))??;
        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        let result = conn.transaction(statement, depth, limit).await;
        if result.is_ok() || statement == TransactionStatement::Rollback {
            self.with_state(|state| state.pool.pop_transaction(pooled.id, id))??;
        }
        result
    }

    /// Dispose a connection: its commands, its transactions (innermost
    /// first) and the physical connection. No-op in single-connection mode.
    pub(crate) async fn dispose_connection(&self, id: ConnectionId) -> DbResult<()> {
        if self.single_connection() {
            return Ok(());
        }
        match self.with_state(|state| state.pool.remove_connection(id))? {
            Some(removed) => self.teardown(removed).await,
            None => Ok(()),
        }
    }

    async fn teardown(&self, removed: RemovedConnection) -> DbResult<()> {
        let connection_id = removed.connection.id;
        let limit = self.options().resolve_timeout(None);
        let mut guard = removed.connection.inner.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(());
        };

        for transaction in &removed.transactions {
            if let Err(e) = conn
                .transaction(TransactionStatement::Rollback, transaction.depth, limit)
                .await
            {
                warn!(
                    connection_id,
                    transaction_id = transaction.id,
                    error = %e,
                    "Failed to roll back transaction of disposed connection"
                );
            }
        }
        conn.close().await?;
        info!(
            connection_id,
            transactions = removed.transactions.len(),
            commands = removed.commands,
            "Connection disposed"
        );
        Ok(())
    }

    /// Dispose every pooled connection, clear the schema and bulk caches and
    /// report builders that were never dropped.
    pub async fn close(&self) -> DbResult<()> {
        let (removed, cleared, leaked) = self.with_state(|state| {
            let removed = state.pool.drain();
            let cleared = state.schema.clear(None);
            state.compiled.clear();
            (removed, cleared, state.pool.clear_builders())
        })?;
        for builder_id in leaked {
            warn!(builder_id, "Builder still alive at database close");
        }

        let mut first_error = None;
        for connection in removed {
            if let Err(e) = self.teardown(connection).await {
                warn!(error = %e, "Failed to close connection");
                first_error.get_or_insert(e);
            }
        }
        info!(schemas = cleared, "Database closed");
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn register_builder(&self) -> DbResult<BuilderId> {
        self.with_state(|state| state.pool.register_builder())
    }

    pub(crate) fn release_builder(&self, id: BuilderId) {
        if let Err(e) = self.with_state(|state| state.pool.release_builder(id)) {
            warn!(builder_id = id, error = %e, "Failed to release builder");
        }
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Schema of an ad-hoc table, probed once and cached.
    ///
    /// `None` when introspection is disabled or the probe fails; failures are
    /// not cached.
    pub async fn schema(&self, table: &str) -> DbResult<Option<Arc<TableSchema>>> {
        self.table_schema(None, table).await
    }

    pub async fn table_schema(&self, owner: Option<&str>, table: &str) -> DbResult<Option<Arc<TableSchema>>> {
        if !self.options().capabilities().contains(Capabilities::SUPPORTS_SCHEMA) {
            return Ok(None);
        }
        let key = SchemaCache::table_key(owner, table);
        if let Some(schema) = self.cached_schema(&key) {
            return Ok(Some(schema));
        }

        let connection = self.open_connection().await?;
        let limit = self.options().resolve_timeout(None);
        let probed = {
            let mut guard = connection.pooled().inner.lock().await;
            match guard.as_mut() {
                Some(conn) => probe_table(conn, self.dialect(), owner, table, limit).await,
                None => Err(connection_closed()),
            }
        };
        let closed = connection.close().await;

        let schema = match probed? {
            Some(schema) => Some(self.with_state(|state| state.schema.get_or_insert(key, schema))?),
            None => None,
        };
        closed?;
        Ok(schema)
    }

    /// Schema of a mapped type, cached under its type name.
    ///
    /// `None` for unmappable types. Declared attributes are merged over the
    /// table schema when the mapping overrides it or no table schema exists.
    pub async fn schema_of<T: Entity>(&self) -> DbResult<Option<Arc<TableSchema>>> {
        let mapping = T::mapping();
        if !mapping.is_mappable() {
            return Ok(None);
        }
        if let Some(schema) = self.cached_schema(&mapping.type_name) {
            return Ok(Some(schema));
        }

        let from_db = self
            .table_schema(mapping.owner.as_deref(), &mapping.table)
            .await?;
        let key = mapping.type_name.clone();
        let schema = self.with_state(|state| match from_db {
            Some(db_schema) if !mapping.override_schema => {
                state.schema.get_or_insert_shared(key, db_schema)
            }
            other => state
                .schema
                .get_or_insert(key, mapping.merged_schema(other.as_deref())),
        })?;
        Ok(Some(schema))
    }

    pub(crate) fn cached_schema(&self, key: &str) -> Option<Arc<TableSchema>> {
        match self.with_state(|state| state.schema.get(key)) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(key, error = %e, "Schema cache unavailable");
                None
            }
        }
    }

    /// Drop one cached schema (by table or type name) or all of them.
    /// Compiled bulk commands were rendered against these schemas and are
    /// dropped as well.
    pub fn clear_schema(&self, key: Option<&str>) -> DbResult<usize> {
        let (cleared, compiled) = self.with_state(|state| (state.schema.clear(key), state.compiled.clear()))?;
        debug!(key = ?key, cleared, compiled, "Schema cache cleared");
        Ok(cleared)
    }

    /// Number of cached bulk commands.
    pub fn compiled_commands(&self) -> usize {
        self.with_state(|state| state.compiled.len()).unwrap_or(0)
    }

    /// Schema a builder renders against: its own, else the table's.
    pub(crate) async fn schema_for(
        &self,
        core: &crate::builder::BuilderCore,
    ) -> DbResult<Option<Arc<TableSchema>>> {
        if let Some(schema) = core.schema() {
            return Ok(Some(Arc::clone(schema)));
        }
        if core.table().is_empty() {
            return Ok(None);
        }
        self.table_schema(core.owner(), core.table()).await
    }

    // ------------------------------------------------------------------
    // Builder factories
    // ------------------------------------------------------------------

    pub async fn select(&self, table: &str) -> DbResult<SelectBuilder> {
        let schema = self.schema(table).await?;
        let builder = SelectBuilder::attached(self).table(table);
        Ok(match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        })
    }

    pub async fn select_of<T: Entity>(&self) -> DbResult<SelectBuilder> {
        let schema = self.schema_of::<T>().await?;
        let builder = SelectBuilder::attached(self).table_of::<T>()?;
        Ok(match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        })
    }

    pub async fn insert_into(&self, table: &str) -> DbResult<InsertBuilder> {
        let schema = self.schema(table).await?;
        let builder = InsertBuilder::attached(self).table(table);
        Ok(match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        })
    }

    pub async fn update_table(&self, table: &str) -> DbResult<UpdateBuilder> {
        let schema = self.schema(table).await?;
        let builder = UpdateBuilder::attached(self).table(table);
        Ok(match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        })
    }

    pub async fn delete_from(&self, table: &str) -> DbResult<DeleteBuilder> {
        let schema = self.schema(table).await?;
        let builder = DeleteBuilder::attached(self).table(table);
        Ok(match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        })
    }

    pub(crate) async fn insert_into_entity<T: Entity>(&self, item: &T) -> DbResult<InsertBuilder> {
        let schema = self.schema_of::<T>().await?;
        let builder = InsertBuilder::attached(self).table_of::<T>()?;
        let builder = match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        };
        Ok(builder.entity(item))
    }

    pub(crate) async fn update_entity<T: Entity>(&self, item: &T) -> DbResult<UpdateBuilder> {
        let schema = self.schema_of::<T>().await?;
        let builder = UpdateBuilder::attached(self).table_of::<T>()?;
        let builder = match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        };
        builder.entity(item)
    }

    pub(crate) async fn delete_entity<T: Entity>(&self, item: &T) -> DbResult<DeleteBuilder> {
        let schema = self.schema_of::<T>().await?;
        let builder = DeleteBuilder::attached(self).table_of::<T>()?;
        let builder = match schema {
            Some(schema) => builder.with_schema(schema),
            None => builder,
        };
        builder.entity(item)
    }

    // ------------------------------------------------------------------
    // Raw SQL
    // ------------------------------------------------------------------

    /// Bind positional arguments without schema information.
    pub(crate) fn bind_raw(&self, cmd: &mut DbCommand, args: impl IntoIterator<Item = Value>) -> DbResult<()> {
        let binder = ParameterBinder::new(self.dialect(), None);
        let parameters = args
            .into_iter()
            .enumerate()
            .map(|(ordinal, value)| binder.create(ordinal, None, value))
            .collect::<DbResult<Vec<_>>>()?;
        cmd.set_parameters(parameters);
        Ok(())
    }

    /// Execute a raw statement; placeholders follow the dialect's format.
    pub async fn execute(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<u64> {
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(sql)?;
            self.bind_raw(&mut cmd, args)?;
            cmd.execute_non_query().await
        }
        .await;
        finish(connection, result).await
    }

    pub async fn query(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<Vec<Record>> {
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(sql)?;
            self.bind_raw(&mut cmd, args)?;
            cmd.execute_reader().await
        }
        .await;
        finish(connection, result).await
    }

    /// Rows mapped onto a type through its mapping.
    pub async fn query_as<T: Entity + Default>(
        &self,
        sql: &str,
        args: impl IntoIterator<Item = Value>,
    ) -> DbResult<Vec<T>> {
        let rows = self.query(sql, args).await?;
        map_rows(&rows)
    }

    pub async fn scalar(&self, sql: &str, args: impl IntoIterator<Item = Value>) -> DbResult<Value> {
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(sql)?;
            self.bind_raw(&mut cmd, args)?;
            cmd.execute_scalar().await
        }
        .await;
        finish(connection, result).await
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub async fn execute_builder<B: SqlBuilder + ?Sized>(&self, builder: &B) -> DbResult<u64> {
        let schema = self.schema_for(builder.core()).await?;
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(String::new())?;
            builder.fill_command_with(&mut cmd, schema.as_deref())?;
            cmd.execute_non_query().await
        }
        .await;
        finish(connection, result).await
    }

    pub async fn query_builder<B: SqlBuilder + ?Sized>(&self, builder: &B) -> DbResult<Vec<Record>> {
        let schema = self.schema_for(builder.core()).await?;
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(String::new())?;
            builder.fill_command_with(&mut cmd, schema.as_deref())?;
            cmd.execute_reader().await
        }
        .await;
        finish(connection, result).await
    }

    pub async fn query_builder_as<T: Entity + Default, B: SqlBuilder + ?Sized>(
        &self,
        builder: &B,
    ) -> DbResult<Vec<T>> {
        let rows = self.query_builder(builder).await?;
        map_rows(&rows)
    }

    pub async fn scalar_builder<B: SqlBuilder + ?Sized>(&self, builder: &B) -> DbResult<Value> {
        let schema = self.schema_for(builder.core()).await?;
        let connection = self.open_connection().await?;
        let result = async {
            let mut cmd = connection.create_command(String::new())?;
            builder.fill_command_with(&mut cmd, schema.as_deref())?;
            cmd.execute_scalar().await
        }
        .await;
        finish(connection, result).await
    }

    /// Execute a select, as a scalar fetch when it selects one column with
    /// TOP 1 or LIMIT 1.
    pub async fn select_output(&self, builder: &SelectBuilder) -> DbResult<SelectOutput> {
        if builder.is_scalar() {
            self.scalar_builder(builder).await.map(SelectOutput::Scalar)
        } else {
            self.query_builder(builder).await.map(SelectOutput::Rows)
        }
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    pub async fn insert<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.insert_into_entity(item).await?;
        self.execute_builder(&builder).await
    }

    pub async fn update<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.update_entity(item).await?;
        self.execute_builder(&builder).await
    }

    pub async fn delete<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let builder = self.delete_entity(item).await?;
        self.execute_builder(&builder).await
    }

    /// Update the row matching the item's keys, inserting it when no row matched.
    pub async fn update_or_insert<T: Entity>(&self, item: &T) -> DbResult<u64> {
        let tx = self.begin_transaction().await?;
        let updated = tx.update(item).await?;
        let affected = if updated == 0 { tx.insert(item).await? } else { updated };
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn bulk_insert<T: Entity>(&self, items: &[T]) -> DbResult<u64> {
        bulk::run(self, items, BulkOperation::Insert).await
    }

    pub async fn bulk_update<T: Entity>(&self, items: &[T]) -> DbResult<u64> {
        bulk::run(self, items, BulkOperation::Update).await
    }

    pub async fn bulk_delete<T: Entity>(&self, items: &[T]) -> DbResult<u64> {
        bulk::run(self, items, BulkOperation::Delete).await
    }
}

/// Release a facade connection, preferring the command's error over the close error.
async fn finish<R>(connection: Connection, result: DbResult<R>) -> DbResult<R> {
    let closed = connection.close().await;
    let value = result?;
    closed?;
    Ok(value)
}

fn map_rows<T: Entity + Default>(rows: &[Record]) -> DbResult<Vec<T>> {
    let mapping = T::mapping();
    mapping.ensure_mappable()?;
    rows.iter().map(|row| mapping.from_record(row)).collect()
}

fn connection_closed() -> DbError {
    DbError::invalid_operation("connection is closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite(dir: &TempDir, options: &str) -> Database {
        let path = dir.path().join("test.db");
        let url = format!("sqlite:{}{}", path.display(), options);
        Database::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_connections_are_released() {
        let dir = TempDir::new().unwrap();
        let db = sqlite(&dir, "").await;
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", []).await.unwrap();
        assert_eq!(db.open_connections(), 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_connection_is_reused() {
        let dir = TempDir::new().unwrap();
        let db = sqlite(&dir, "?single_connection=true").await;
        let a = db.open_connection().await.unwrap();
        let b = db.open_connection().await.unwrap();
        assert_eq!(a.id(), b.id());
        a.close().await.unwrap();
        assert!(b.is_open());
        assert_eq!(db.open_connections(), 1);
        db.close().await.unwrap();
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_raw_parameters_use_dialect_placeholders() {
        let dir = TempDir::new().unwrap();
        let db = sqlite(&dir, "").await;
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", []).await.unwrap();
        db.execute("INSERT INTO t (id, name) VALUES (?1, ?2)", [Value::Int(1), "a".into()])
            .await
            .unwrap();
        let name = db.scalar("SELECT name FROM t WHERE id = ?1", [Value::Int(1)]).await.unwrap();
        assert_eq!(name, Value::Text("a".into()));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_forgets_leaked_builders() {
        let dir = TempDir::new().unwrap();
        let db = sqlite(&dir, "?schema=false").await;
        let first = db.select("t").await.unwrap();
        let second = db.delete_from("t").await.unwrap();
        assert_eq!(db.remaining_builders(), 2);
        db.close().await.unwrap();
        assert_eq!(db.remaining_builders(), 0);

        // Late drops of forgotten builders are harmless
        drop(first);
        drop(second);
        assert_eq!(db.remaining_builders(), 0);
    }

    #[tokio::test]
    async fn test_builder_leak_is_counted_until_drop() {
        let dir = TempDir::new().unwrap();
        let db = sqlite(&dir, "?schema=false").await;
        let builder = db.select("t").await.unwrap();
        assert_eq!(db.remaining_builders(), 1);
        drop(builder);
        assert_eq!(db.remaining_builders(), 0);
        db.close().await.unwrap();
    }
}
