//! Predicate compiler: [`Expr`] to a parenthesized SQL fragment.
//!
//! Every visited node yields a self-contained fragment, so precedence never
//! depends on the caller. Constants are never inlined; each becomes a
//! parameter marker with its value pushed onto the parameter list.

use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::predicate::{CallKind, ComparisonOp, Expr, MemberPath};
use crate::value::SqlValue;

/// Compiled predicate with its out-of-band parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Compile `expr` with parameter numbering starting at 1.
pub fn compile(expr: &Expr, dialect: &dyn Dialect) -> Result<CompiledPredicate> {
    let mut params = Vec::new();
    let sql = compile_into(expr, dialect, &mut params)?;
    Ok(CompiledPredicate { sql, params })
}

/// Compile `expr`, appending parameters after those already in `params`.
///
/// On error `params` is left as it was.
pub fn compile_into(expr: &Expr, dialect: &dyn Dialect, params: &mut Vec<SqlValue>) -> Result<String> {
    let mut compiler = Compiler {
        dialect,
        params: std::mem::take(params),
    };
    let base = compiler.params.len();
    let result = compiler.visit(expr);
    *params = compiler.params;
    if result.is_err() {
        params.truncate(base);
    }
    result
}

/// Escape and join a dotted member path
pub fn member_sql(path: &MemberPath, dialect: &dyn Dialect) -> String {
    path.0
        .iter()
        .map(|segment| dialect.escape_identifier(segment))
        .collect::<Vec<_>>()
        .join(".")
}

struct Compiler<'d> {
    dialect: &'d dyn Dialect,
    params: Vec<SqlValue>,
}

impl Compiler<'_> {
    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        self.dialect.parameter_marker(self.params.len())
    }

    fn visit(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Compare { op, left, right } => self.visit_compare(*op, left, right),
            Expr::And(l, r) => Ok(format!("({} AND {})", self.visit(l)?, self.visit(r)?)),
            Expr::Or(l, r) => Ok(format!("({} OR {})", self.visit(l)?, self.visit(r)?)),
            Expr::Not(inner) => Ok(format!("(NOT {})", self.visit(inner)?)),
            Expr::Arith { op, left, right } => {
                Ok(format!("({} {} {})", self.visit(left)?, op, self.visit(right)?))
            }
            Expr::Member(path) => Ok(member_sql(path, self.dialect)),
            Expr::Constant(value) => Ok(self.bind(value.clone())),
            Expr::List(_) => Err(QueryError::translation(
                "List",
                "a value list is only valid as the argument of In",
            )),
            Expr::Call { kind, target, arg } => self.visit_call(*kind, target, arg),
        }
    }

    fn visit_compare(&mut self, op: ComparisonOp, left: &Expr, right: &Expr) -> Result<String> {
        let null_side = match (left, right) {
            (_, Expr::Constant(SqlValue::Null)) => Some(left),
            (Expr::Constant(SqlValue::Null), _) => Some(right),
            _ => None,
        };

        if let Some(operand) = null_side {
            let operand = self.visit(operand)?;
            return match op {
                ComparisonOp::Eq => Ok(format!("({} IS NULL)", operand)),
                ComparisonOp::Ne => Ok(format!("({} IS NOT NULL)", operand)),
                _ => Err(QueryError::translation(
                    "Compare",
                    format!("ordering comparison `{}` against NULL", op),
                )),
            };
        }

        Ok(format!("({} {} {})", self.visit(left)?, op, self.visit(right)?))
    }

    fn visit_call(&mut self, kind: CallKind, target: &Expr, arg: &Expr) -> Result<String> {
        let target_sql = self.visit(target)?;

        if kind == CallKind::In {
            let Expr::List(items) = arg else {
                return Err(QueryError::translation(
                    arg.kind(),
                    "In expects a value list argument",
                ));
            };
            if items.is_empty() {
                return Ok("(1 = 0)".to_string());
            }
            let markers = items
                .iter()
                .map(|item| self.visit(item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(format!("({} IN ({}))", target_sql, markers.join(", ")));
        }

        let pattern = match arg {
            Expr::Constant(SqlValue::Text(text)) => {
                let escaped = self.dialect.escape_like(text);
                let pattern = match kind {
                    CallKind::LikePrefix => format!("{}%", escaped),
                    CallKind::LikeSuffix => format!("%{}", escaped),
                    _ => format!("%{}%", escaped),
                };
                self.bind(SqlValue::Text(pattern))
            }
            Expr::Constant(other) => {
                return Err(QueryError::translation(
                    "Constant",
                    format!("{} expects a text pattern, got {}", kind, other.type_name()),
                ));
            }
            Expr::List(_) => {
                return Err(QueryError::translation(
                    "List",
                    format!("{} expects a single pattern", kind),
                ));
            }
            other => {
                let wildcard = self.dialect.quote_literal("%");
                let value = self.visit(other)?;
                let parts = match kind {
                    CallKind::LikePrefix => vec![value, wildcard],
                    CallKind::LikeSuffix => vec![wildcard, value],
                    _ => vec![wildcard.clone(), value, wildcard],
                };
                return Ok(format!("({} LIKE {})", target_sql, self.dialect.concat(&parts)));
            }
        };

        Ok(format!("({} LIKE {} ESCAPE '!')", target_sql, pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect};
    use crate::predicate::{col, lit};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compare_binds_constant() {
        let compiled = compile(&col("active").eq(true), &SqliteDialect).unwrap();
        assert_eq!(compiled.sql, "(\"active\" = ?1)");
        assert_eq!(compiled.params, vec![SqlValue::Bool(true)]);
    }

    #[test]
    fn test_logical_nesting_is_parenthesized() {
        let expr = col("a").eq(1).or(col("b").eq(2)).and(!col("c").gt(3));
        let compiled = compile(&expr, &PostgresDialect).unwrap();
        assert_eq!(
            compiled.sql,
            "(((\"a\" = $1) OR (\"b\" = $2)) AND (NOT (\"c\" > $3)))"
        );
        assert_eq!(compiled.params, vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]);
    }

    #[test]
    fn test_arithmetic_and_member_path() {
        let expr = (col("order.total") * lit(2) - 5).ge(col("limit"));
        let compiled = compile(&expr, &MySqlDialect).unwrap();
        assert_eq!(compiled.sql, "(((`order`.`total` * ?) - ?) >= `limit`)");
        assert_eq!(compiled.params, vec![SqlValue::Int(2), SqlValue::Int(5)]);
    }

    #[test]
    fn test_string_literal_never_inlined() {
        let compiled = compile(&col("name").eq("O'Reilly; DROP TABLE users"), &SqliteDialect).unwrap();
        assert_eq!(compiled.sql, "(\"name\" = ?1)");
        assert_eq!(compiled.params, vec![SqlValue::Text("O'Reilly; DROP TABLE users".into())]);
    }

    #[test]
    fn test_null_comparisons() {
        let d = SqliteDialect;
        assert_eq!(compile(&col("deleted_at").is_null(), &d).unwrap().sql, "(\"deleted_at\" IS NULL)");
        assert_eq!(
            compile(&col("deleted_at").is_not_null(), &d).unwrap().sql,
            "(\"deleted_at\" IS NOT NULL)"
        );
        let err = compile(&col("age").gt(SqlValue::Null), &d).unwrap_err();
        assert!(matches!(err, QueryError::ExpressionTranslation { ref node, .. } if node == "Compare"));
    }

    #[test]
    fn test_in_list() {
        let compiled = compile(&col("id").is_in([1, 2, 3]), &SqlServerDialect).unwrap();
        assert_eq!(compiled.sql, "([id] IN (@p1, @p2, @p3))");
        assert_eq!(compiled.params.len(), 3);

        let empty = compile(&col("id").is_in(Vec::<i64>::new()), &SqliteDialect).unwrap();
        assert_eq!(empty.sql, "(1 = 0)");
        assert!(empty.params.is_empty());
    }

    #[test]
    fn test_like_calls_escape_wildcards() {
        let d = SqliteDialect;
        let prefix = compile(&col("name").starts_with("50%"), &d).unwrap();
        assert_eq!(prefix.sql, "(\"name\" LIKE ?1 ESCAPE '!')");
        assert_eq!(prefix.params, vec![SqlValue::Text("50!%%".into())]);

        let suffix = compile(&col("name").ends_with("son"), &d).unwrap();
        assert_eq!(suffix.params, vec![SqlValue::Text("%son".into())]);

        let contains = compile(&col("name").contains("a_b"), &d).unwrap();
        assert_eq!(contains.params, vec![SqlValue::Text("%a!_b%".into())]);
    }

    #[test]
    fn test_like_with_column_argument_uses_concat() {
        let sqlite = compile(&col("title").starts_with(col("prefix")), &SqliteDialect).unwrap();
        assert_eq!(sqlite.sql, "(\"title\" LIKE (\"prefix\" || '%'))");

        let mysql = compile(&col("title").contains(col("word")), &MySqlDialect).unwrap();
        assert_eq!(mysql.sql, "(`title` LIKE CONCAT('%', `word`, '%'))");
    }

    #[test]
    fn test_unsupported_nodes_fail() {
        let d = SqliteDialect;

        let bare_list = compile(&col("a").eq(Expr::List(vec![lit(1)])), &d).unwrap_err();
        assert!(matches!(bare_list, QueryError::ExpressionTranslation { ref node, .. } if node == "List"));

        let in_scalar = Expr::Call {
            kind: CallKind::In,
            target: Box::new(col("a")),
            arg: Box::new(lit(1)),
        };
        assert!(matches!(
            compile(&in_scalar, &d).unwrap_err(),
            QueryError::ExpressionTranslation { ref node, .. } if node == "Constant"
        ));

        let numeric_like = compile(&col("a").starts_with(5), &d).unwrap_err();
        assert!(numeric_like.to_string().contains("LikePrefix"));
    }

    #[test]
    fn test_compile_into_continues_numbering() {
        let mut params = vec![SqlValue::Int(1)];
        let sql = compile_into(&col("b").eq(2), &PostgresDialect, &mut params).unwrap();
        assert_eq!(sql, "(\"b\" = $2)");
        assert_eq!(params.len(), 2);

        let err = compile_into(&col("c").eq(3).and(col("d").lt(SqlValue::Null)), &PostgresDialect, &mut params);
        assert!(err.is_err());
        assert_eq!(params.len(), 2);
    }
}
