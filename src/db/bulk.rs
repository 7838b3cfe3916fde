//! Bulk insert/update/delete of mapped types.
//!
//! A bulk operation renders its statement once, in virtual mode, and records
//! which field getter feeds each parameter ordinal. The compiled command is
//! cached per database instance, keyed by mapped type and operation, since
//! its text depends on the instance's dialect and schema. Execution replays
//! it for every item inside one transaction; any failure rolls the whole
//! batch back.

use crate::builder::{DeleteBuilder, InsertBuilder, SqlBuilder, UpdateBuilder};
use crate::config::Dialect;
use crate::db::command::DbCommand;
use crate::db::database::Database;
use crate::db::params::DbParameter;
use crate::error::{DbError, DbResult};
use crate::models::mapping::Getter;
use crate::models::{Entity, Operator, Predicate, TableSchema, TypeMapping, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkOperation {
    Insert,
    Update,
    Delete,
}

/// A statement rendered once, with one getter per parameter ordinal.
pub struct CompiledCommand<T> {
    text: String,
    parameters: Vec<DbParameter>,
    getters: Vec<Getter<T>>,
}

impl<T> std::fmt::Debug for CompiledCommand<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCommand")
            .field("text", &self.text)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl<T> CompiledCommand<T> {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[DbParameter] {
        &self.parameters
    }

    /// Copy the item's values into the command's parameters, by ordinal.
    fn fill(&self, item: &T, cmd: &mut DbCommand) {
        let mut parameters = self.parameters.clone();
        for (parameter, get) in parameters.iter_mut().zip(&self.getters) {
            parameter.value = get(item);
        }
        cmd.set_parameters(parameters);
    }
}

/// Compiled bulk commands of one database instance.
#[derive(Default)]
pub struct CompiledCache {
    entries: HashMap<(TypeId, BulkOperation), Arc<dyn Any + Send + Sync>>,
}

impl CompiledCache {
    pub fn get<T: Entity>(&self, operation: BulkOperation) -> Option<Arc<CompiledCommand<T>>> {
        let entry = self.entries.get(&(TypeId::of::<T>(), operation))?;
        Arc::clone(entry).downcast::<CompiledCommand<T>>().ok()
    }

    /// Cache a command unless one is already stored; returns the cached entry.
    pub fn get_or_insert<T: Entity>(
        &mut self,
        operation: BulkOperation,
        compiled: CompiledCommand<T>,
    ) -> Arc<CompiledCommand<T>> {
        if let Some(existing) = self.get::<T>(operation) {
            return existing;
        }
        let compiled = Arc::new(compiled);
        self.entries
            .insert((TypeId::of::<T>(), operation), Arc::clone(&compiled) as Arc<dyn Any + Send + Sync>);
        compiled
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CompiledCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Render the statement of `operation` for a mapped type.
pub fn compile<T: Entity>(
    dialect: &Dialect,
    schema: Option<&TableSchema>,
    operation: BulkOperation,
) -> DbResult<CompiledCommand<T>> {
    let mapping = T::mapping();
    mapping.ensure_mappable()?;

    let mut cmd = DbCommand::new();
    let mut slots: Vec<Option<Getter<T>>> = Vec::new();
    let mut observer = |parameter: &DbParameter| {
        let getter = parameter
            .source_column
            .as_deref()
            .and_then(|column| mapping.find(column))
            .map(|column| column.get);
        slots.push(getter);
    };

    match operation {
        BulkOperation::Insert => {
            let mut builder = InsertBuilder::new(dialect.clone())
                .table(mapping.table.clone())
                .virtual_mode(true);
            for column in mapping.columns().filter(|c| !c.no_insert) {
                builder = builder.value(column.name.clone(), Value::Null);
            }
            with_owner(builder, mapping, |b: InsertBuilder, owner| b.owner(owner))
                .fill_command_observed(&mut cmd, schema, &mut observer)?;
        }
        BulkOperation::Update => {
            mapping.require_keys(schema)?;
            let mut builder = UpdateBuilder::new(dialect.clone())
                .table(mapping.table.clone())
                .virtual_mode(true);
            for column in mapping.columns() {
                if mapping.is_key(column, schema) {
                    builder = builder.where_predicate(Predicate::placeholder(column.name.clone(), Operator::Eq));
                } else if !column.no_update {
                    builder = builder.set(column.name.clone(), Value::Null);
                }
            }
            with_owner(builder, mapping, |b: UpdateBuilder, owner| b.owner(owner))
                .fill_command_observed(&mut cmd, schema, &mut observer)?;
        }
        BulkOperation::Delete => {
            mapping.require_keys(schema)?;
            let mut builder = DeleteBuilder::new(dialect.clone())
                .table(mapping.table.clone())
                .virtual_mode(true);
            for column in mapping.keys(schema) {
                builder = builder.where_predicate(Predicate::placeholder(column.name.clone(), Operator::Eq));
            }
            with_owner(builder, mapping, |b: DeleteBuilder, owner| b.owner(owner))
                .fill_command_observed(&mut cmd, schema, &mut observer)?;
        }
    }

    let getters = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| DbError::bulk("parameter has no mapped column", cmd.dump()))?;
    debug!(operation = ?operation, sql = %cmd.text(), params = getters.len(), "Compiled bulk command");

    Ok(CompiledCommand {
        text: cmd.text().to_string(),
        parameters: cmd.parameters().to_vec(),
        getters,
    })
}

fn with_owner<T, B>(builder: B, mapping: &TypeMapping<T>, owner: fn(B, String) -> B) -> B {
    match &mapping.owner {
        Some(name) => owner(builder, name.clone()),
        None => builder,
    }
}

/// Compiled command of a type, compiling and caching it on first use.
pub(crate) async fn compiled<T: Entity>(db: &Database, operation: BulkOperation) -> DbResult<Arc<CompiledCommand<T>>> {
    if let Some(compiled) = db.with_state(|state| state.compiled.get::<T>(operation))? {
        return Ok(compiled);
    }
    let schema = db.schema_of::<T>().await?;
    let compiled = compile::<T>(db.dialect(), schema.as_deref(), operation)?;
    db.with_state(|state| state.compiled.get_or_insert(operation, compiled))
}

/// Replay the compiled command for every item inside one transaction.
pub(crate) async fn run<T: Entity>(db: &Database, items: &[T], operation: BulkOperation) -> DbResult<u64> {
    if items.is_empty() {
        return Ok(0);
    }
    let compiled = compiled::<T>(db, operation).await?;

    let tx = db.begin_transaction().await?;
    let mut cmd = tx.create_command(compiled.text())?;
    let mut affected = 0;
    for item in items {
        compiled.fill(item, &mut cmd);
        match cmd.execute_non_query().await {
            Ok(rows) => affected += rows,
            Err(e) => {
                let dump = cmd.dump();
                drop(cmd);
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back bulk operation");
                }
                return Err(DbError::bulk(e.to_string(), dump));
            }
        }
    }
    drop(cmd);
    tx.commit().await?;

    info!(operation = ?operation, items = items.len(), rows = affected, "Bulk operation completed");
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseOptions;
    use crate::models::{ColumnDescriptor, ColumnMapping, DbType, FromValue};
    use std::sync::OnceLock;

    #[derive(Debug, Default)]
    struct Item {
        id: i64,
        name: String,
        created: i64,
    }

    impl Entity for Item {
        fn mapping() -> &'static TypeMapping<Self> {
            static MAPPING: OnceLock<TypeMapping<Item>> = OnceLock::new();
            MAPPING.get_or_init(|| {
                TypeMapping::new("bulk::Item", "items")
                    .column(
                        ColumnMapping::new("id", DbType::Int64, |i: &Item| i.id.into(), |i, v| {
                            i.id = FromValue::from_value(v)?;
                            Ok(())
                        })
                        .key(),
                    )
                    .column(ColumnMapping::new("name", DbType::String, |i: &Item| i.name.clone().into(), |i, v| {
                        i.name = FromValue::from_value(v)?;
                        Ok(())
                    }))
                    .column(
                        ColumnMapping::new("created", DbType::Int64, |i: &Item| i.created.into(), |i, v| {
                            i.created = FromValue::from_value(v)?;
                            Ok(())
                        })
                        .no_update(),
                    )
            })
        }
    }

    #[test]
    fn test_compile_insert() {
        let compiled = compile::<Item>(&Dialect::default(), None, BulkOperation::Insert).unwrap();
        assert_eq!(
            compiled.text(),
            r#"INSERT INTO "items" ("id", "name", "created") VALUES (@0, @1, @2)"#
        );
        assert!(compiled.parameters().iter().all(|p| p.value.is_null()));
    }

    #[test]
    fn test_compile_update_maps_getters_by_ordinal() {
        let compiled = compile::<Item>(&Dialect::default(), None, BulkOperation::Update).unwrap();
        assert_eq!(compiled.text(), r#"UPDATE "items" SET "name" = @0 WHERE "id" = @1"#);

        let mut cmd = DbCommand::new();
        let item = Item {
            id: 7,
            name: "x".into(),
            created: 1,
        };
        compiled.fill(&item, &mut cmd);
        let values: Vec<_> = cmd.parameters().iter().map(|p| p.value.clone()).collect();
        assert_eq!(values, vec![Value::Text("x".into()), Value::Int(7)]);
    }

    #[test]
    fn test_compile_delete_uses_schema_types() {
        let schema = TableSchema::new("items").with_column(ColumnDescriptor::new("ID", DbType::Int32).key());
        let compiled = compile::<Item>(&Dialect::default(), Some(&schema), BulkOperation::Delete).unwrap();
        assert_eq!(compiled.text(), r#"DELETE FROM "items" WHERE "ID" = @0"#);
        assert_eq!(compiled.parameters()[0].db_type, DbType::Int32);
    }

    #[tokio::test]
    async fn test_compiled_commands_are_cached_per_database() {
        let sqlite = Database::with_options(DatabaseOptions::parse("sqlite:items.db?schema=false").unwrap());
        let mysql = Database::with_options(DatabaseOptions::parse("mysql://u:p@localhost/app?schema=false").unwrap());

        let a = compiled::<Item>(&sqlite, BulkOperation::Delete).await.unwrap();
        let b = compiled::<Item>(&mysql, BulkOperation::Delete).await.unwrap();
        assert_eq!(a.text(), r#"DELETE FROM "items" WHERE "id" = ?1"#);
        assert_eq!(b.text(), "DELETE FROM `items` WHERE `id` = ?");

        let again = compiled::<Item>(&sqlite, BulkOperation::Delete).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(sqlite.compiled_commands(), 1);

        // Clearing the schema cache forces a recompile
        sqlite.clear_schema(None).unwrap();
        assert_eq!(sqlite.compiled_commands(), 0);
        assert_eq!(mysql.compiled_commands(), 1);
        let recompiled = compiled::<Item>(&sqlite, BulkOperation::Delete).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &recompiled));

        sqlite.close().await.unwrap();
        assert_eq!(sqlite.compiled_commands(), 0);
    }

    #[test]
    fn test_compiled_cache_keys_by_type_and_operation() {
        let mut cache = CompiledCache::default();
        let insert = compile::<Item>(&Dialect::default(), None, BulkOperation::Insert).unwrap();
        let stored = cache.get_or_insert(BulkOperation::Insert, insert);
        assert!(cache.get::<Item>(BulkOperation::Delete).is_none());

        let duplicate = compile::<Item>(&Dialect::default(), None, BulkOperation::Insert).unwrap();
        let kept = cache.get_or_insert(BulkOperation::Insert, duplicate);
        assert!(Arc::ptr_eq(&stored, &kept));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
