//! SELECT statements.

use crate::builder::{impl_builder_common, BuilderCore, ClauseBuilder, RenderContext, SqlBuilder};
use crate::config::{Capabilities, Dialect};
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::models::{Operator, Predicate, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn function(self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
enum SelectColumn {
    Plain { name: String, alias: Option<String> },
    Aggregate { function: Aggregate, column: String, alias: String },
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    owner: Option<String>,
    table: String,
    alias: Option<String>,
    on: String,
}

/// Result of executing a select: all rows, or one value when the select is scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutput {
    Rows(Vec<Record>),
    Scalar(Value),
}

impl SelectOutput {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            SelectOutput::Rows(rows) => rows,
            SelectOutput::Scalar(value) => vec![Record::new().with("value", value)],
        }
    }

    pub fn into_scalar(self) -> Value {
        match self {
            SelectOutput::Scalar(value) => value,
            SelectOutput::Rows(rows) => rows
                .first()
                .and_then(|r| r.get_index(0))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

/// Builds `SELECT` statements.
#[derive(Debug)]
pub struct SelectBuilder {
    core: BuilderCore,
    columns: Vec<SelectColumn>,
    distinct: bool,
    top: Option<u64>,
    limit: Option<u64>,
    offset: Option<u64>,
    joins: Vec<Join>,
    group_by: Vec<String>,
    having: Vec<Predicate>,
    order_by: Vec<(String, SortOrder)>,
}

impl_builder_common!(SelectBuilder);

impl SelectBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_core(BuilderCore::new(dialect))
    }

    pub fn attached(db: &Database) -> Self {
        Self::with_core(BuilderCore::attached(db))
    }

    fn with_core(core: BuilderCore) -> Self {
        Self {
            core,
            columns: Vec::new(),
            distinct: false,
            top: None,
            limit: None,
            offset: None,
            joins: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(SelectColumn::Plain {
            name: name.into(),
            alias: None,
        });
        self
    }

    pub fn column_as(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.columns.push(SelectColumn::Plain {
            name: name.into(),
            alias: Some(alias.into()),
        });
        self
    }

    pub fn columns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        for name in names {
            self = self.column(name);
        }
        self
    }

    /// Add an aggregate column. An aggregate over `*` without an alias gets a
    /// generated one.
    pub fn aggregate(mut self, function: Aggregate, column: impl Into<String>, alias: Option<&str>) -> Self {
        let column = column.into();
        let alias = match alias {
            Some(alias) => alias.to_string(),
            None if column == "*" => format!("agg_{}", uuid::Uuid::new_v4().simple()),
            None => format!("{}_{}", function.function().to_lowercase(), column),
        };
        self.columns.push(SelectColumn::Aggregate {
            function,
            column,
            alias,
        });
        self
    }

    pub fn count(self) -> Self {
        self.aggregate(Aggregate::Count, "*", None)
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// `SELECT TOP n`; fails when the dialect has no TOP.
    pub fn top(mut self, n: u64) -> DbResult<Self> {
        self.require(Capabilities::SUPPORTS_TOP, "TOP")?;
        self.top = Some(n);
        Ok(self)
    }

    /// `LIMIT n`; fails when the dialect has no LIMIT/OFFSET.
    pub fn limit(mut self, n: u64) -> DbResult<Self> {
        self.require(Capabilities::SUPPORTS_LIMIT_OFFSET, "LIMIT")?;
        self.limit = Some(n);
        Ok(self)
    }

    pub fn offset(mut self, n: u64) -> DbResult<Self> {
        self.require(Capabilities::SUPPORTS_LIMIT_OFFSET, "OFFSET")?;
        self.offset = Some(n);
        Ok(self)
    }

    /// Join `table` on a raw condition such as `"a"."id" = "b"."a_id"`.
    pub fn join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        alias: Option<&str>,
        on: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            owner: None,
            table: table.into(),
            alias: alias.map(str::to_string),
            on: on.into(),
        });
        self
    }

    /// Join on column equality, `left = right`, quoting both sides.
    pub fn join_on(
        self,
        kind: JoinKind,
        table: impl Into<String>,
        alias: Option<&str>,
        left: &str,
        right: &str,
    ) -> Self {
        let dialect = self.core.dialect();
        let on = format!("{} = {}", quote_path(dialect, left), quote_path(dialect, right));
        self.join(kind, table, alias, on)
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having.push(predicate);
        self
    }

    pub fn having_op(self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.having(Predicate::new(column, operator, value))
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), SortOrder::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), SortOrder::Desc));
        self
    }

    /// One column with TOP 1 or LIMIT 1 yields a single value.
    pub fn is_scalar(&self) -> bool {
        self.columns.len() == 1 && (self.top == Some(1) || self.limit == Some(1))
    }

    /// Execute through the attached database.
    pub async fn execute(&self) -> DbResult<SelectOutput> {
        self.core.database()?.select_output(self).await
    }

    fn require(&self, capability: Capabilities, feature: &str) -> DbResult<()> {
        if self.core.dialect().supports(capability) {
            Ok(())
        } else {
            Err(DbError::not_supported(feature))
        }
    }

    fn render_columns(&self, sql: &mut String, ctx: &RenderContext<'_>) {
        if self.columns.is_empty() {
            sql.push('*');
            return;
        }
        let dialect = ctx.dialect();
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            match column {
                SelectColumn::Plain { name, alias } => {
                    sql.push_str(&ctx.column(name));
                    if let Some(alias) = alias {
                        sql.push_str(" AS ");
                        sql.push_str(&dialect.quote(alias));
                    }
                }
                SelectColumn::Aggregate {
                    function,
                    column,
                    alias,
                } => {
                    sql.push_str(&format!(
                        "{}({}) AS {}",
                        function.function(),
                        ctx.column(column),
                        dialect.quote(alias)
                    ));
                }
            }
        }
    }
}

/// Quote `table.column` paths segment by segment.
fn quote_path(dialect: &Dialect, path: &str) -> String {
    path.split('.').map(|part| dialect.quote(part)).collect::<Vec<_>>().join(".")
}

impl SqlBuilder for SelectBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn render(&self, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()> {
        let table = self.core.table_ref()?;
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if let Some(top) = self.top {
            sql.push_str(&format!("TOP {top} "));
        }
        self.render_columns(sql, ctx);
        sql.push_str(" FROM ");
        sql.push_str(&table);

        let dialect = ctx.dialect();
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&dialect.quote_table(join.owner.as_deref(), &join.table));
            if let Some(alias) = &join.alias {
                sql.push_str(" AS ");
                sql.push_str(&dialect.quote(alias));
            }
            sql.push_str(" ON ");
            sql.push_str(&join.on);
        }

        ClauseBuilder::render("WHERE", self.core.predicates(), sql, ctx)?;

        if !self.group_by.is_empty() {
            let columns: Vec<String> = self.group_by.iter().map(|c| ctx.column(c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        ClauseBuilder::render("HAVING", &self.having, sql, ctx)?;

        if !self.order_by.is_empty() {
            let columns: Vec<String> = self
                .order_by
                .iter()
                .map(|(c, order)| match order {
                    SortOrder::Asc => ctx.column(c),
                    SortOrder::Desc => format!("{} DESC", ctx.column(c)),
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&columns.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(())
    }
}
