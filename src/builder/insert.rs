//! INSERT statements.

use crate::builder::{impl_builder_common, BuilderCore, RenderContext, SqlBuilder};
use crate::config::Dialect;
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::models::{Entity, Record, Value};

/// Builds `INSERT INTO t (..) VALUES (..)` for one row.
#[derive(Debug)]
pub struct InsertBuilder {
    core: BuilderCore,
    values: Vec<(String, Value)>,
}

impl_builder_common!(InsertBuilder);

impl InsertBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            core: BuilderCore::new(dialect),
            values: Vec::new(),
        }
    }

    pub fn attached(db: &Database) -> Self {
        Self {
            core: BuilderCore::attached(db),
            values: Vec::new(),
        }
    }

    /// Set a column value. Setting a column twice keeps the last value.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(&column)) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    pub fn values(mut self, record: &Record) -> Self {
        for (column, value) in record.iter() {
            self = self.value(column, value.clone());
        }
        self
    }

    /// Values of every insertable mapped field of `item`.
    pub fn entity<T: Entity>(mut self, item: &T) -> Self {
        for column in T::mapping().columns().filter(|c| !c.no_insert) {
            self = self.value(column.name.clone(), (column.get)(item));
        }
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    pub async fn execute(&self) -> DbResult<u64> {
        self.core.database()?.execute_builder(self).await
    }
}

impl SqlBuilder for InsertBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn render(&self, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()> {
        let table = self.core.table_ref()?;
        if self.values.is_empty() {
            return Err(DbError::invalid_operation(format!(
                "insert into '{}' has no values",
                self.core.table()
            )));
        }

        let mut columns = Vec::with_capacity(self.values.len());
        let mut placeholders = Vec::with_capacity(self.values.len());
        for (column, value) in &self.values {
            columns.push(ctx.column(column));
            placeholders.push(ctx.bind(Some(column), value.clone())?);
        }
        sql.push_str(&format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbCommand;
    use crate::models::{ColumnDescriptor, DbType, TableSchema};
    use std::sync::Arc;

    #[test]
    fn test_insert_text_and_parameters() {
        let builder = InsertBuilder::new(Dialect::default())
            .table("T")
            .value("a", 1)
            .value("b", "x")
            .value("A", 2);
        let mut cmd = DbCommand::new();
        builder.fill_command(&mut cmd).unwrap();
        assert_eq!(cmd.text(), r#"INSERT INTO "T" ("a", "b") VALUES (@0, @1)"#);
        assert_eq!(cmd.parameters()[0].value, Value::Int(2));
    }

    #[test]
    fn test_insert_without_values_fails() {
        let err = InsertBuilder::new(Dialect::default()).table("T").command_text().unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));
    }

    #[test]
    fn test_schema_types_parameters() {
        let schema = TableSchema::new("T")
            .with_column(ColumnDescriptor::new("Name", DbType::String).with_size(40));
        let builder = InsertBuilder::new(Dialect::default())
            .table("T")
            .with_schema(Arc::new(schema))
            .value("name", "bob");
        let mut cmd = DbCommand::new();
        builder.fill_command(&mut cmd).unwrap();
        assert_eq!(cmd.text(), r#"INSERT INTO "T" ("Name") VALUES (@0)"#);
        assert_eq!(cmd.parameters()[0].db_type, DbType::String);
        assert_eq!(cmd.parameters()[0].size, 40);
    }
}
