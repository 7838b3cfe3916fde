//! UPDATE statements.

use crate::builder::{impl_builder_common, BuilderCore, ClauseBuilder, RenderContext, SqlBuilder};
use crate::config::Dialect;
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::models::{Entity, Predicate, Value};

/// Builds `UPDATE t SET .. WHERE ..`.
#[derive(Debug)]
pub struct UpdateBuilder {
    core: BuilderCore,
    assignments: Vec<(String, Value)>,
}

impl_builder_common!(UpdateBuilder);

impl UpdateBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            core: BuilderCore::new(dialect),
            assignments: Vec::new(),
        }
    }

    pub fn attached(db: &Database) -> Self {
        Self {
            core: BuilderCore::attached(db),
            assignments: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self
            .assignments
            .iter_mut()
            .find(|(c, _)| c.eq_ignore_ascii_case(&column))
        {
            Some(slot) => slot.1 = value,
            None => self.assignments.push((column, value)),
        }
        self
    }

    /// Assign the updatable fields of `item` and match its key columns. Keys
    /// come from the mapping or from the bound schema.
    pub fn entity<T: Entity>(mut self, item: &T) -> DbResult<Self> {
        let mapping = T::mapping();
        let schema = self.core.schema().cloned();
        mapping.require_keys(schema.as_deref())?;
        for column in mapping.columns() {
            let value = (column.get)(item);
            if mapping.is_key(column, schema.as_deref()) {
                self.core.push_predicate(Predicate::eq(column.name.clone(), value));
            } else if !column.no_update {
                self = self.set(column.name.clone(), value);
            }
        }
        Ok(self)
    }

    pub async fn execute(&self) -> DbResult<u64> {
        self.core.database()?.execute_builder(self).await
    }
}

impl SqlBuilder for UpdateBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn render(&self, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()> {
        let table = self.core.table_ref()?;
        if self.assignments.is_empty() {
            return Err(DbError::invalid_operation(format!(
                "update of '{}' has no assignments",
                self.core.table()
            )));
        }

        let mut assignments = Vec::with_capacity(self.assignments.len());
        for (column, value) in &self.assignments {
            let name = ctx.bind(Some(column), value.clone())?;
            assignments.push(format!("{} = {}", ctx.column(column), name));
        }
        sql.push_str(&format!("UPDATE {table} SET {}", assignments.join(", ")));
        ClauseBuilder::render("WHERE", self.core.predicates(), sql, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbCommand;

    #[test]
    fn test_update_parameters_follow_text_order() {
        let builder = UpdateBuilder::new(Dialect::default())
            .table("T")
            .set("a", 1)
            .set("b", Value::Null)
            .where_eq("id", 9);
        let mut cmd = DbCommand::new();
        builder.fill_command(&mut cmd).unwrap();
        assert_eq!(cmd.text(), r#"UPDATE "T" SET "a" = @0, "b" = @1 WHERE "id" = @2"#);
        let values: Vec<_> = cmd.parameters().iter().map(|p| p.value.clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Null, Value::Int(9)]);
    }

    #[test]
    fn test_update_without_assignments_fails() {
        let err = UpdateBuilder::new(Dialect::default())
            .table("T")
            .where_eq("id", 1)
            .command_text()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));
    }
}
