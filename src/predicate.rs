//! Predicate expressions over entity attributes.
//!
//! Predicates are built with [`col`] and [`lit`] and the combinators on
//! [`Expr`]:
//!
//! ```rust
//! use relq::predicate::{col, lit};
//!
//! let active_adults = col("active").eq(true).and(col("age").ge(18));
//! let by_name = col("name").starts_with("Al") | col("id").is_in([1, 2, 3]);
//! let discounted = (col("price") * lit(0.9)).lt(100);
//! ```

use crate::backend::QueryRow;
use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use std::cmp::Ordering;
use std::fmt;
use std::ops;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Ne => write!(f, "<>"),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Le => write!(f, "<="),
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Ge => write!(f, ">="),
        }
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
        }
    }
}

/// Named call operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Membership in a list
    In,
    /// Starts-with match
    LikePrefix,
    /// Ends-with match
    LikeSuffix,
    /// Substring match
    LikeContains,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::In => write!(f, "In"),
            CallKind::LikePrefix => write!(f, "LikePrefix"),
            CallKind::LikeSuffix => write!(f, "LikeSuffix"),
            CallKind::LikeContains => write!(f, "LikeContains"),
        }
    }
}

/// A dotted attribute path such as `address.city`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPath(pub Vec<String>);

impl MemberPath {
    pub fn parse(path: &str) -> Self {
        MemberPath(path.split('.').map(|s| s.trim().to_string()).collect())
    }

    /// Last path segment; the column name in a flat result row.
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Predicate expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Member(MemberPath),
    Constant(SqlValue),
    /// Value list; only meaningful as the argument of [`CallKind::In`]
    List(Vec<Expr>),
    Call {
        kind: CallKind,
        target: Box<Expr>,
        arg: Box<Expr>,
    },
}

/// Reference an attribute by (optionally dotted) name
pub fn col(path: &str) -> Expr {
    Expr::Member(MemberPath::parse(path))
}

/// A constant value
pub fn lit(value: impl Into<SqlValue>) -> Expr {
    Expr::Constant(value.into())
}

/// Anything usable as the right-hand side of a comparison.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl<T: Into<SqlValue>> IntoExpr for T {
    fn into_expr(self) -> Expr {
        Expr::Constant(self.into())
    }
}

impl Expr {
    /// Node kind name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Compare { .. } => "Compare",
            Expr::And(..) => "And",
            Expr::Or(..) => "Or",
            Expr::Not(_) => "Not",
            Expr::Arith { .. } => "Arith",
            Expr::Member(_) => "MemberPath",
            Expr::Constant(_) => "Constant",
            Expr::List(_) => "List",
            Expr::Call { .. } => "Call",
        }
    }

    fn compare(self, op: ComparisonOp, rhs: impl IntoExpr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into_expr()),
        }
    }

    fn call(self, kind: CallKind, arg: Expr) -> Expr {
        Expr::Call {
            kind,
            target: Box::new(self),
            arg: Box::new(arg),
        }
    }

    pub fn eq(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.compare(ComparisonOp::Ge, rhs)
    }

    pub fn is_null(self) -> Expr {
        self.compare(ComparisonOp::Eq, SqlValue::Null)
    }

    pub fn is_not_null(self) -> Expr {
        self.compare(ComparisonOp::Ne, SqlValue::Null)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let list = values.into_iter().map(|v| Expr::Constant(v.into())).collect();
        self.call(CallKind::In, Expr::List(list))
    }

    pub fn starts_with(self, prefix: impl IntoExpr) -> Expr {
        self.call(CallKind::LikePrefix, prefix.into_expr())
    }

    pub fn ends_with(self, suffix: impl IntoExpr) -> Expr {
        self.call(CallKind::LikeSuffix, suffix.into_expr())
    }

    pub fn contains(self, needle: impl IntoExpr) -> Expr {
        self.call(CallKind::LikeContains, needle.into_expr())
    }

    /// Evaluate the predicate against a row in memory.
    ///
    /// Follows SQL semantics: a comparison involving NULL is never true.
    pub fn evaluate(&self, row: &QueryRow) -> Result<bool> {
        Ok(matches!(self.eval(row)?, SqlValue::Bool(true)))
    }

    fn eval(&self, row: &QueryRow) -> Result<SqlValue> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            Expr::Member(path) => Ok(row.get(path.leaf()).cloned().unwrap_or(SqlValue::Null)),
            Expr::Compare { op, left, right } => {
                let (l, r) = (left.eval(row)?, right.eval(row)?);
                if r.is_null() && matches!(**right, Expr::Constant(_)) {
                    return match op {
                        ComparisonOp::Eq => Ok(SqlValue::Bool(l.is_null())),
                        ComparisonOp::Ne => Ok(SqlValue::Bool(!l.is_null())),
                        _ => Err(QueryError::translation(
                            "Compare",
                            format!("ordering comparison `{}` against NULL", op),
                        )),
                    };
                }
                Ok(match compare_values(&l, &r) {
                    None => SqlValue::Null,
                    Some(ord) => SqlValue::Bool(match op {
                        ComparisonOp::Eq => ord == Ordering::Equal,
                        ComparisonOp::Ne => ord != Ordering::Equal,
                        ComparisonOp::Lt => ord == Ordering::Less,
                        ComparisonOp::Le => ord != Ordering::Greater,
                        ComparisonOp::Gt => ord == Ordering::Greater,
                        ComparisonOp::Ge => ord != Ordering::Less,
                    }),
                })
            }
            Expr::And(l, r) => Ok(match (truth(&l.eval(row)?), truth(&r.eval(row)?)) {
                (Some(false), _) | (_, Some(false)) => SqlValue::Bool(false),
                (Some(true), Some(true)) => SqlValue::Bool(true),
                _ => SqlValue::Null,
            }),
            Expr::Or(l, r) => Ok(match (truth(&l.eval(row)?), truth(&r.eval(row)?)) {
                (Some(true), _) | (_, Some(true)) => SqlValue::Bool(true),
                (Some(false), Some(false)) => SqlValue::Bool(false),
                _ => SqlValue::Null,
            }),
            Expr::Not(inner) => Ok(match truth(&inner.eval(row)?) {
                Some(b) => SqlValue::Bool(!b),
                None => SqlValue::Null,
            }),
            Expr::Arith { op, left, right } => arith(*op, &left.eval(row)?, &right.eval(row)?),
            Expr::List(_) => Err(QueryError::translation(
                "List",
                "a value list is only valid as the argument of In",
            )),
            Expr::Call { kind, target, arg } => {
                let value = target.eval(row)?;
                match kind {
                    CallKind::In => {
                        let Expr::List(items) = arg.as_ref() else {
                            return Err(QueryError::translation(
                                arg.kind(),
                                "In expects a value list",
                            ));
                        };
                        if value.is_null() {
                            return Ok(SqlValue::Null);
                        }
                        for item in items {
                            if compare_values(&value, &item.eval(row)?) == Some(Ordering::Equal) {
                                return Ok(SqlValue::Bool(true));
                            }
                        }
                        Ok(SqlValue::Bool(false))
                    }
                    _ => {
                        let needle = arg.eval(row)?;
                        let (Some(hay), Some(needle)) = (text_of(&value), text_of(&needle)) else {
                            return Ok(SqlValue::Null);
                        };
                        Ok(SqlValue::Bool(match kind {
                            CallKind::LikePrefix => hay.starts_with(&needle),
                            CallKind::LikeSuffix => hay.ends_with(&needle),
                            _ => hay.contains(&needle),
                        }))
                    }
                }
            }
        }
    }
}

fn truth(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        _ => None,
    }
}

fn text_of(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn numeric(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Float(f) => Some(*f),
        SqlValue::Bool(b) => Some(f64::from(u8::from(*b))),
        SqlValue::Decimal(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

fn compare_values(l: &SqlValue, r: &SqlValue) -> Option<Ordering> {
    if l.is_null() || r.is_null() {
        return None;
    }
    if let (Some(a), Some(b)) = (numeric(l), numeric(r)) {
        return a.partial_cmp(&b);
    }
    match (l, r) {
        (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => Some(a.cmp(b)),
        (SqlValue::TimestampTz(a), SqlValue::TimestampTz(b)) => Some(a.cmp(b)),
        (SqlValue::Uuid(a), SqlValue::Uuid(b)) => Some(a.cmp(b)),
        _ => Some(text_of(l)?.cmp(&text_of(r)?)),
    }
}

fn arith(op: ArithOp, l: &SqlValue, r: &SqlValue) -> Result<SqlValue> {
    if l.is_null() || r.is_null() {
        return Ok(SqlValue::Null);
    }
    if let (SqlValue::Int(a), SqlValue::Int(b)) = (l, r) {
        return Ok(match op {
            ArithOp::Add => SqlValue::Int(a.wrapping_add(*b)),
            ArithOp::Sub => SqlValue::Int(a.wrapping_sub(*b)),
            ArithOp::Mul => SqlValue::Int(a.wrapping_mul(*b)),
            // Division by zero or `i64::MIN / -1`
            ArithOp::Div => a.checked_div(*b).map_or(SqlValue::Null, SqlValue::Int),
        });
    }
    match (numeric(l), numeric(r)) {
        (Some(a), Some(b)) => Ok(SqlValue::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        })),
        _ => Err(QueryError::translation(
            "Arith",
            format!("`{}` on {} and {}", op, l.type_name(), r.type_name()),
        )),
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

macro_rules! impl_arith {
    ($($trait:ident :: $method:ident => $op:ident),* $(,)?) => {
        $(
            impl<R: IntoExpr> ops::$trait<R> for Expr {
                type Output = Expr;

                fn $method(self, rhs: R) -> Expr {
                    Expr::Arith {
                        op: ArithOp::$op,
                        left: Box::new(self),
                        right: Box::new(rhs.into_expr()),
                    }
                }
            }
        )*
    };
}

impl_arith! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
}
