//! WHERE/HAVING clause rendering.

use crate::builder::RenderContext;
use crate::error::{DbError, DbResult};
use crate::models::{Operator, Predicate, Value};

/// Renders an ordered list of conditions.
pub struct ClauseBuilder;

impl ClauseBuilder {
    /// Append ` {keyword} ...` to `sql`. Nothing is written for an empty list.
    ///
    /// Null values render as `IS NULL`/`IS NOT NULL` without a parameter,
    /// except in virtual mode or for placeholder conditions, where the value
    /// slot is always a parameter.
    pub fn render(
        keyword: &str,
        predicates: &[Predicate],
        sql: &mut String,
        ctx: &mut RenderContext<'_>,
    ) -> DbResult<()> {
        if predicates.is_empty() {
            return Ok(());
        }

        sql.push(' ');
        sql.push_str(keyword);
        sql.push(' ');
        for (index, predicate) in predicates.iter().enumerate() {
            if index > 0 {
                sql.push_str(if predicate.or { " OR " } else { " AND " });
            }
            if predicate.begin_block {
                sql.push('(');
            }
            Self::render_condition(predicate, sql, ctx)?;
            if predicate.end_block {
                sql.push(')');
            }
        }
        Ok(())
    }

    fn render_condition(predicate: &Predicate, sql: &mut String, ctx: &mut RenderContext<'_>) -> DbResult<()> {
        let column = ctx.column(&predicate.column);
        let bind_null = ctx.is_virtual() || predicate.virtual_column;

        match predicate.operator {
            operator if predicate.value.is_null() && !bind_null => match operator {
                Operator::Eq => sql.push_str(&format!("{column} IS NULL")),
                Operator::Not => sql.push_str(&format!("{column} IS NOT NULL")),
                other => {
                    return Err(DbError::invalid_operation(format!(
                        "operator {other:?} cannot compare '{}' with NULL",
                        predicate.column
                    )));
                }
            },
            Operator::In => {
                let values = collection(predicate)?;
                sql.push_str(&column);
                sql.push_str(" IN(");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    let name = ctx.bind(Some(&predicate.column), value.clone())?;
                    sql.push_str(&name);
                }
                sql.push(')');
            }
            Operator::Between => {
                let values = collection(predicate)?;
                let [from, to] = values else {
                    return Err(DbError::invalid_argument(
                        predicate.column.clone(),
                        format!("BETWEEN needs exactly 2 values, got {}", values.len()),
                    ));
                };
                let from = ctx.bind(Some(&predicate.column), from.clone())?;
                let to = ctx.bind(Some(&predicate.column), to.clone())?;
                sql.push_str(&format!("{column} BETWEEN {from} AND {to}"));
            }
            operator => {
                let op = operator.to_sql()?;
                if predicate.value.is_list() {
                    return Err(DbError::invalid_argument(
                        predicate.column.clone(),
                        format!("operator {operator:?} needs a scalar value"),
                    ));
                }
                let name = ctx.bind(Some(&predicate.column), predicate.value.clone())?;
                sql.push_str(&format!("{column} {op} {name}"));
            }
        }
        Ok(())
    }
}

/// Values of an In/Between condition. Placeholders in virtual mode carry none.
fn collection(predicate: &Predicate) -> DbResult<&[Value]> {
    predicate.value.as_list().ok_or_else(|| {
        DbError::invalid_argument(
            predicate.column.clone(),
            format!("operator {:?} needs a list of values", predicate.operator),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dialect;
    use crate::db::params::ParameterBinder;

    fn render(predicates: &[Predicate]) -> DbResult<(String, usize)> {
        let dialect = Dialect::default();
        let mut ctx = RenderContext::new(ParameterBinder::new(&dialect, None));
        let mut sql = String::new();
        ClauseBuilder::render("WHERE", predicates, &mut sql, &mut ctx)?;
        Ok((sql, ctx.into_parameters().len()))
    }

    #[test]
    fn test_empty_clause_renders_nothing() {
        assert_eq!(render(&[]).unwrap(), (String::new(), 0));
    }

    #[test]
    fn test_null_comparisons_have_no_parameter() {
        let (sql, count) = render(&[
            Predicate::eq("a", Value::Null),
            Predicate::new("b", Operator::Not, Value::Null),
        ])
        .unwrap();
        assert_eq!(sql, r#" WHERE "a" IS NULL AND "b" IS NOT NULL"#);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_null_with_non_equality_operator_fails() {
        let err = render(&[Predicate::new("a", Operator::Gt, Value::Null)]).unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));
        for operator in [Operator::In, Operator::Between, Operator::Like] {
            let err = render(&[Predicate::new("a", operator, Value::Null)]).unwrap_err();
            assert!(matches!(err, DbError::InvalidOperation { .. }), "{operator:?}");
        }
    }

    #[test]
    fn test_blocks_and_joiners() {
        let (sql, count) = render(&[
            Predicate::eq("a", 1),
            Predicate::eq("b", 2).begin_block(),
            Predicate::eq("c", 3).or().end_block(),
        ])
        .unwrap();
        assert_eq!(sql, r#" WHERE "a" = @0 AND ("b" = @1 OR "c" = @2)"#);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_in_and_between() {
        let (sql, count) = render(&[
            Predicate::new("id", Operator::In, Value::List(vec![1.into(), 2.into(), 3.into()])),
            Predicate::new("n", Operator::Between, Value::List(vec![10.into(), 20.into()])),
        ])
        .unwrap();
        assert_eq!(sql, r#" WHERE "id" IN(@0, @1, @2) AND "n" BETWEEN @3 AND @4"#);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_empty_in_list() {
        let (sql, count) = render(&[Predicate::new("id", Operator::In, Value::List(vec![]))]).unwrap();
        assert_eq!(sql, r#" WHERE "id" IN()"#);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_between_arity() {
        let err = render(&[Predicate::new(
            "n",
            Operator::Between,
            Value::List(vec![1.into(), 2.into(), 3.into()]),
        )])
        .unwrap_err();
        assert!(err.to_string().contains("exactly 2"));

        let err = render(&[Predicate::new("n", Operator::Between, 5)]).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
    }

    #[test]
    fn test_list_with_scalar_operator_fails() {
        let err = render(&[Predicate::eq("a", Value::List(vec![1.into()]))]).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
    }

    #[test]
    fn test_placeholder_binds_null_slot() {
        let (sql, count) = render(&[Predicate::placeholder("id", Operator::Eq)]).unwrap();
        assert_eq!(sql, r#" WHERE "id" = @0"#);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_virtual_mode_binds_nulls() {
        let dialect = Dialect::default();
        let binder = ParameterBinder::new(&dialect, None).virtual_mode(true);
        let mut ctx = RenderContext::new(binder);
        let mut sql = String::new();
        ClauseBuilder::render("WHERE", &[Predicate::eq("id", 7)], &mut sql, &mut ctx).unwrap();
        assert_eq!(sql, r#" WHERE "id" = @0"#);
        assert!(ctx.into_parameters()[0].value.is_null());
    }
}
