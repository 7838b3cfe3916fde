//! SQL statement builders.
//!
//! Each builder accumulates the pieces of one statement through consuming
//! fluent calls and renders it on demand into a [`DbCommand`]: the statement
//! text plus its parameters in ordinal order. Rendering never mutates the
//! builder, so filling a command twice yields identical text and parameters.
//!
//! ```ignore
//! let cmd_text = SelectBuilder::new(Dialect::default())
//!     .table("T")
//!     .where_eq("id", 5)
//!     .command_text()?;
//! assert_eq!(cmd_text, r#"SELECT * FROM "T" WHERE "id" = @0"#);
//! ```

pub mod clause;
pub mod delete;
pub mod insert;
pub mod select;
pub mod update;

pub use clause::ClauseBuilder;
pub use delete::DeleteBuilder;
pub use insert::InsertBuilder;
pub use select::{Aggregate, JoinKind, SelectBuilder, SelectOutput, SortOrder};
pub use update::UpdateBuilder;

use crate::config::Dialect;
use crate::db::params::{DbParameter, ParameterBinder};
use crate::db::pool::BuilderId;
use crate::db::{Database, DbCommand};
use crate::error::{DbError, DbResult};
use crate::models::{Entity, Predicate, TableSchema, Value};
use std::sync::Arc;
use tracing::warn;

/// Collects the parameters of one rendering pass.
pub struct RenderContext<'a> {
    binder: ParameterBinder<'a>,
    parameters: Vec<DbParameter>,
    observer: Option<&'a mut dyn FnMut(&DbParameter)>,
}

impl<'a> RenderContext<'a> {
    pub fn new(binder: ParameterBinder<'a>) -> Self {
        Self {
            binder,
            parameters: Vec::new(),
            observer: None,
        }
    }

    /// Report every created parameter to `observer`, in ordinal order.
    pub fn with_observer(mut self, observer: &'a mut dyn FnMut(&DbParameter)) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.binder.is_virtual()
    }

    pub fn dialect(&self) -> &'a Dialect {
        self.binder.dialect()
    }

    /// Quoted column name, canonicalized through the schema when it knows the
    /// column. `alias.column` paths are quoted per segment.
    pub fn column(&self, name: &str) -> String {
        let dialect = self.binder.dialect();
        if let Some(column) = self.binder.schema().and_then(|schema| schema.get(name)) {
            return dialect.quote(&column.name);
        }
        if name.contains('.') && !name.contains('(') {
            return name
                .split('.')
                .map(|part| dialect.quote(part))
                .collect::<Vec<_>>()
                .join(".");
        }
        dialect.quote(name)
    }

    /// Register a parameter and return its placeholder.
    pub fn bind(&mut self, column: Option<&str>, value: Value) -> DbResult<String> {
        let parameter = self.binder.create(self.parameters.len(), column, value)?;
        if let Some(observer) = self.observer.as_mut() {
            observer(&parameter);
        }
        let name = parameter.name.clone();
        self.parameters.push(parameter);
        Ok(name)
    }

    pub fn into_parameters(self) -> Vec<DbParameter> {
        self.parameters
    }
}

/// State shared by every builder: target table, conditions and context.
pub struct BuilderCore {
    dialect: Dialect,
    table: String,
    owner: Option<String>,
    alias: Option<String>,
    schema: Option<Arc<TableSchema>>,
    predicates: Vec<Predicate>,
    virtual_mode: bool,
    db: Option<Database>,
    registration: Option<BuilderId>,
}

impl std::fmt::Debug for BuilderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderCore")
            .field("table", &self.table)
            .field("owner", &self.owner)
            .field("alias", &self.alias)
            .field("predicates", &self.predicates)
            .field("virtual_mode", &self.virtual_mode)
            .finish_non_exhaustive()
    }
}

impl BuilderCore {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            table: String::new(),
            owner: None,
            alias: None,
            schema: None,
            predicates: Vec::new(),
            virtual_mode: false,
            db: None,
            registration: None,
        }
    }

    /// A core bound to a database, registered among its remaining builders.
    pub fn attached(db: &Database) -> Self {
        let mut core = Self::new(db.dialect().clone());
        core.registration = match db.register_builder() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to register builder");
                None
            }
        };
        core.db = Some(db.clone());
        core
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn schema(&self) -> Option<&Arc<TableSchema>> {
        self.schema.as_ref()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_mode
    }

    pub fn database(&self) -> DbResult<&Database> {
        self.db
            .as_ref()
            .ok_or_else(|| DbError::invalid_operation("builder is not attached to a database"))
    }

    pub(crate) fn set_table(&mut self, table: impl Into<String>) {
        self.table = table.into();
        self.schema = None;
    }

    pub(crate) fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = Some(owner.into());
    }

    pub(crate) fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }

    pub(crate) fn set_schema(&mut self, schema: Option<Arc<TableSchema>>) {
        self.schema = schema;
    }

    pub(crate) fn set_virtual(&mut self, enabled: bool) {
        self.virtual_mode = enabled;
    }

    /// Bind the table and schema of a mapped type.
    pub(crate) fn set_table_of<T: Entity>(&mut self) -> DbResult<()> {
        let mapping = T::mapping();
        mapping.ensure_mappable()?;
        self.table = mapping.table.clone();
        self.owner = mapping.owner.clone();
        let cached = self
            .db
            .as_ref()
            .and_then(|db| db.cached_schema(&mapping.type_name));
        self.schema = Some(cached.unwrap_or_else(|| Arc::new(mapping.declared_schema())));
        Ok(())
    }

    pub(crate) fn push_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// Quoted table reference, with owner prefix and alias.
    pub fn table_ref(&self) -> DbResult<String> {
        if self.table.is_empty() {
            return Err(DbError::invalid_operation("no table specified"));
        }
        let mut out = self.dialect.quote_table(self.owner.as_deref(), &self.table);
        if let Some(alias) = &self.alias {
            out.push_str(" AS ");
            out.push_str(&self.dialect.quote(alias));
        }
        Ok(out)
    }

    /// Parameter binder for a rendering pass against `schema`.
    pub fn binder<'a>(&'a self, schema: Option<&'a TableSchema>) -> ParameterBinder<'a> {
        ParameterBinder::new(&self.dialect, schema).virtual_mode(self.virtual_mode)
    }
}

impl Drop for BuilderCore {
    fn drop(&mut self) {
        if let (Some(db), Some(id)) = (&self.db, self.registration) {
            db.release_builder(id);
        }
    }
}

/// Common surface of the statement builders.
pub trait SqlBuilder {
    fn core(&self) -> &BuilderCore;

    /// Append the statement to `sql`, registering parameters on `ctx`.
    fn render(&self, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()>;

    /// Materialize text and parameters into `cmd`, replacing previous content.
    fn fill_command(&self, cmd: &mut DbCommand) -> DbResult<()> {
        let schema = self.core().schema().cloned();
        self.fill_command_with(cmd, schema.as_deref())
    }

    /// Like [`fill_command`](Self::fill_command) against an explicit schema.
    fn fill_command_with(&self, cmd: &mut DbCommand, schema: Option<&TableSchema>) -> DbResult<()> {
        let mut ctx = RenderContext::new(self.core().binder(schema));
        let mut sql = String::new();
        self.render(&mut sql, &mut ctx)?;
        cmd.set_text(sql);
        cmd.set_parameters(ctx.into_parameters());
        Ok(())
    }

    /// Like [`fill_command_with`](Self::fill_command_with), reporting each
    /// created parameter to `observer` in ordinal order.
    fn fill_command_observed(
        &self,
        cmd: &mut DbCommand,
        schema: Option<&TableSchema>,
        observer: &mut dyn FnMut(&DbParameter),
    ) -> DbResult<()> {
        let mut ctx = RenderContext::new(self.core().binder(schema)).with_observer(observer);
        let mut sql = String::new();
        self.render(&mut sql, &mut ctx)?;
        cmd.set_text(sql);
        cmd.set_parameters(ctx.into_parameters());
        Ok(())
    }

    /// Rendered statement text.
    fn command_text(&self) -> DbResult<String> {
        let mut cmd = DbCommand::new();
        self.fill_command(&mut cmd)?;
        Ok(cmd.text().to_string())
    }
}

/// Builder methods shared by every statement type: table binding and WHERE conditions.
macro_rules! impl_builder_common {
    ($builder:ty) => {
        impl $builder {
            /// Target an ad-hoc table.
            pub fn table(mut self, table: impl Into<String>) -> Self {
                self.core.set_table(table);
                self
            }

            /// Target the table of a mapped type.
            pub fn table_of<T: $crate::models::Entity>(mut self) -> $crate::error::DbResult<Self> {
                self.core.set_table_of::<T>()?;
                Ok(self)
            }

            pub fn owner(mut self, owner: impl Into<String>) -> Self {
                self.core.set_owner(owner);
                self
            }

            pub fn alias(mut self, alias: impl Into<String>) -> Self {
                self.core.set_alias(alias);
                self
            }

            /// Use an already resolved schema for column names and parameter types.
            pub fn with_schema(mut self, schema: std::sync::Arc<$crate::models::TableSchema>) -> Self {
                self.core.set_schema(Some(schema));
                self
            }

            /// Render schema-typed placeholders instead of bound values.
            pub fn virtual_mode(mut self, enabled: bool) -> Self {
                self.core.set_virtual(enabled);
                self
            }

            /// Add a condition.
            pub fn where_predicate(mut self, predicate: $crate::models::Predicate) -> Self {
                self.core.push_predicate(predicate);
                self
            }

            /// `column = value`, or `column IS NULL` for a null value.
            pub fn where_eq(self, column: impl Into<String>, value: impl Into<$crate::models::Value>) -> Self {
                self.where_predicate($crate::models::Predicate::eq(column, value))
            }

            pub fn where_op(
                self,
                column: impl Into<String>,
                operator: $crate::models::Operator,
                value: impl Into<$crate::models::Value>,
            ) -> Self {
                self.where_predicate($crate::models::Predicate::new(column, operator, value))
            }

            /// `column = value` joined with OR.
            pub fn or_where(self, column: impl Into<String>, value: impl Into<$crate::models::Value>) -> Self {
                self.where_predicate($crate::models::Predicate::eq(column, value).or())
            }

            pub fn where_in<V: Into<$crate::models::Value>>(
                self,
                column: impl Into<String>,
                values: impl IntoIterator<Item = V>,
            ) -> Self {
                let values: Vec<$crate::models::Value> = values.into_iter().map(Into::into).collect();
                self.where_predicate($crate::models::Predicate::new(
                    column,
                    $crate::models::Operator::In,
                    $crate::models::Value::List(values),
                ))
            }

            pub fn where_between(
                self,
                column: impl Into<String>,
                from: impl Into<$crate::models::Value>,
                to: impl Into<$crate::models::Value>,
            ) -> Self {
                self.where_predicate($crate::models::Predicate::new(
                    column,
                    $crate::models::Operator::Between,
                    $crate::models::Value::List(vec![from.into(), to.into()]),
                ))
            }

            /// One equality condition per field of a record, optionally only key columns.
            pub fn where_record(mut self, record: &$crate::models::Record, keys_only: bool) -> Self {
                for (column, value) in record.iter() {
                    if keys_only && !self.core.is_key_column(column) {
                        continue;
                    }
                    self.core
                        .push_predicate($crate::models::Predicate::eq(column, value.clone()));
                }
                self
            }

            /// Conditions from the mapped fields of an item, optionally only key columns.
            pub fn where_entity<T: $crate::models::Entity>(mut self, item: &T, keys_only: bool) -> Self {
                let mapping = T::mapping();
                let schema = self.core.schema().cloned();
                for column in mapping.columns() {
                    if keys_only && !mapping.is_key(column, schema.as_deref()) {
                        continue;
                    }
                    self.core.push_predicate($crate::models::Predicate::eq(
                        column.name.clone(),
                        (column.get)(item),
                    ));
                }
                self
            }

            pub fn core(&self) -> &$crate::builder::BuilderCore {
                &self.core
            }
        }
    };
}

pub(crate) use impl_builder_common;

impl BuilderCore {
    /// Whether the schema marks `column` as a key.
    pub(crate) fn is_key_column(&self, column: &str) -> bool {
        self.schema
            .as_ref()
            .and_then(|s| s.get(column))
            .is_some_and(|c| c.is_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, DbType};

    #[test]
    fn test_render_context_canonicalizes_columns() {
        let dialect = Dialect::default();
        let schema = TableSchema::new("T").with_column(ColumnDescriptor::new("UserId", DbType::Int32));
        let ctx = RenderContext::new(ParameterBinder::new(&dialect, Some(&schema)));
        assert_eq!(ctx.column("userid"), "\"UserId\"");
        assert_eq!(ctx.column("other"), "\"other\"");
        assert_eq!(ctx.column("COUNT(*)"), "COUNT(*)");
        assert_eq!(ctx.column("t.other"), "\"t\".\"other\"");
    }

    #[test]
    fn test_render_context_observer_sees_ordinals() {
        let dialect = Dialect::default();
        let mut seen = Vec::new();
        let mut observer = |p: &DbParameter| seen.push((p.ordinal, p.source_column.clone()));
        {
            let mut ctx =
                RenderContext::new(ParameterBinder::new(&dialect, None)).with_observer(&mut observer);
            assert_eq!(ctx.bind(Some("a"), Value::Int(1)).unwrap(), "@0");
            assert_eq!(ctx.bind(Some("b"), Value::Int(2)).unwrap(), "@1");
        }
        assert_eq!(seen, vec![(0, Some("a".into())), (1, Some("b".into()))]);
    }

    #[test]
    fn test_table_ref() {
        let mut core = BuilderCore::new(Dialect::default());
        assert!(core.table_ref().is_err());
        core.set_table("T");
        core.set_owner("dbo");
        core.set_alias("t");
        assert_eq!(core.table_ref().unwrap(), "\"dbo\".\"T\" AS \"t\"");
    }
}
