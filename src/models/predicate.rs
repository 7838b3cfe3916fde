//! WHERE/HAVING conditions.
//!
//! Conditions form a flat, ordered list. Grouping is expressed through the
//! `begin_block`/`end_block` flags instead of a nested tree, and the boolean
//! joiner is a per-condition flag that is ignored for the first entry.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Operator {
    #[default]
    Eq,
    Not,
    Like,
    NotLike,
    In,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
}

impl Operator {
    /// SQL text of a scalar operator.
    ///
    /// `In` and `Between` are rendered structurally and have no text form.
    pub fn to_sql(self) -> DbResult<&'static str> {
        match self {
            Operator::Eq => Ok("="),
            Operator::Not => Ok("<>"),
            Operator::Like => Ok("LIKE"),
            Operator::NotLike => Ok("NOT LIKE"),
            Operator::Lt => Ok("<"),
            Operator::Lte => Ok("<="),
            Operator::Gt => Ok(">"),
            Operator::Gte => Ok(">="),
            Operator::In | Operator::Between => Err(DbError::invalid_operation(format!(
                "operator {:?} has no scalar SQL form",
                self
            ))),
        }
    }

    /// Whether the operator consumes an enumerable value.
    pub fn is_collection(self) -> bool {
        matches!(self, Operator::In | Operator::Between)
    }
}

/// One condition of a WHERE or HAVING clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
    /// Join with `OR` instead of `AND`. Ignored on the first condition.
    pub or: bool,
    /// Open a parenthesised group before this condition.
    pub begin_block: bool,
    /// Close a parenthesised group after this condition.
    pub end_block: bool,
    /// The value slot is a placeholder typed by the column's schema.
    pub virtual_column: bool,
}

impl Predicate {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
            or: false,
            begin_block: false,
            end_block: false,
            virtual_column: false,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// A condition whose value is bound later, per execution.
    pub fn placeholder(column: impl Into<String>, operator: Operator) -> Self {
        let mut predicate = Self::new(column, operator, Value::Null);
        predicate.virtual_column = true;
        predicate
    }

    pub fn or(mut self) -> Self {
        self.or = true;
        self
    }

    pub fn begin_block(mut self) -> Self {
        self.begin_block = true;
        self
    }

    pub fn end_block(mut self) -> Self {
        self.end_block = true;
        self
    }
}
