//! DELETE statements.

use crate::builder::{impl_builder_common, BuilderCore, ClauseBuilder, RenderContext, SqlBuilder};
use crate::config::Dialect;
use crate::db::Database;
use crate::error::DbResult;
use crate::models::{Entity, Predicate};

/// Builds `DELETE FROM t WHERE ..`. Without conditions every row is deleted.
#[derive(Debug)]
pub struct DeleteBuilder {
    core: BuilderCore,
}

impl_builder_common!(DeleteBuilder);

impl DeleteBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            core: BuilderCore::new(dialect),
        }
    }

    pub fn attached(db: &Database) -> Self {
        Self {
            core: BuilderCore::attached(db),
        }
    }

    /// Match the key columns of `item`.
    pub fn entity<T: Entity>(mut self, item: &T) -> DbResult<Self> {
        let mapping = T::mapping();
        let schema = self.core.schema().cloned();
        mapping.require_keys(schema.as_deref())?;
        for column in mapping.keys(schema.as_deref()) {
            self.core
                .push_predicate(Predicate::eq(column.name.clone(), (column.get)(item)));
        }
        Ok(self)
    }

    pub async fn execute(&self) -> DbResult<u64> {
        self.core.database()?.execute_builder(self).await
    }
}

impl SqlBuilder for DeleteBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn render(&self, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()> {
        sql.push_str("DELETE FROM ");
        sql.push_str(&self.core.table_ref()?);
        ClauseBuilder::render("WHERE", self.core.predicates(), sql, ctx)
    }
}
