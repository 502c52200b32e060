//! Per-query state and statement assembly.

use crate::compiler::member_sql;
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::predicate::MemberPath;
use crate::value::SqlValue;
use std::fmt;
use std::time::Duration;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// ORDER BY key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: MemberPath,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn to_sql(&self, dialect: &dyn Dialect) -> String {
        format!("{} {}", member_sql(&self.column, dialect), self.direction)
    }
}

/// Hint for an external cache; carried, never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHint {
    pub ttl: Duration,
    pub tag: Option<String>,
}

/// Assembled SQL text with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub cache: Option<CacheHint>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
            cache: None,
        }
    }

    /// SQL with parameters substituted as literals, for diagnostics only.
    /// Never execute the result.
    ///
    /// Markers inside quoted text or quoted identifiers are left alone.
    pub fn interpolate(&self, dialect: &dyn Dialect) -> String {
        let first = dialect.parameter_marker(1);
        let positional = first == dialect.parameter_marker(2);

        let mut out = String::with_capacity(self.sql.len());
        let mut next = 0;
        let mut quote: Option<char> = None;
        let mut rest = self.sql.as_str();

        while let Some(c) = rest.chars().next() {
            if quote.is_none() {
                if let Some((index, len)) = marker_at(rest, dialect, positional, &first, next) {
                    match self.params.get(index) {
                        Some(value) => out.push_str(&dialect.format_literal(value)),
                        None => out.push_str(&rest[..len]),
                    }
                    next = index + 1;
                    rest = &rest[len..];
                    continue;
                }
            }

            quote = match (quote, c) {
                (Some(close), c) if c == close => None,
                (Some(close), _) => Some(close),
                (None, '\'') => Some('\''),
                (None, '"') => Some('"'),
                (None, '`') => Some('`'),
                (None, '[') => Some(']'),
                (None, _) => None,
            };
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
        out
    }
}

/// Parameter marker at the start of `sql`: its 0-based index and byte length.
fn marker_at(
    sql: &str,
    dialect: &dyn Dialect,
    positional: bool,
    first: &str,
    next: usize,
) -> Option<(usize, usize)> {
    if positional {
        return sql.starts_with(first).then_some((next, first.len()));
    }
    // Longest numbered marker wins, so `?1` never eats `?10`.
    let prefix = first.trim_end_matches('1');
    let digits = sql
        .strip_prefix(prefix)?
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    let n: usize = sql[prefix.len()..prefix.len() + digits].parse().ok()?;
    if n == 0 || dialect.parameter_marker(n).len() != prefix.len() + digits {
        return None;
    }
    Some((n - 1, prefix.len() + digits))
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Mutable description of one query, owned by one builder.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub table: String,
    pub identity_column: String,
    /// Compiled WHERE fragments, AND-ed together
    pub predicates: Vec<String>,
    pub params: Vec<SqlValue>,
    pub order_by: Vec<OrderBy>,
    /// Projected columns; empty means all
    pub projection: Vec<MemberPath>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub includes: Vec<String>,
    pub cache: Option<CacheHint>,
}

impl QueryContext {
    pub fn new(table: impl Into<String>, identity_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            identity_column: identity_column.into(),
            ..Self::default()
        }
    }

    fn where_sql(&self) -> Option<String> {
        match self.predicates.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(format!("({})", many.join(" AND "))),
        }
    }

    fn columns_sql(&self, dialect: &dyn Dialect) -> String {
        if self.projection.is_empty() {
            return "*".to_string();
        }

        let mut columns = self.projection.clone();
        let has_identity = columns
            .iter()
            .any(|c| c.leaf().eq_ignore_ascii_case(&self.identity_column));
        if !self.includes.is_empty() && !has_identity {
            columns.push(MemberPath::parse(&self.identity_column));
        }

        columns
            .iter()
            .map(|c| member_sql(c, dialect))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `SELECT` for this context. `row_limit` caps the row count below any
    /// `take` (used by `first`).
    ///
    /// A row limit with no skip or take uses the dialect's `TOP n` form when
    /// it has one, which needs no ORDER BY.
    pub fn select_statement(&self, dialect: &dyn Dialect, row_limit: Option<u64>) -> Result<Statement> {
        let top = match (self.skip, self.take, row_limit) {
            (None, None, Some(limit)) => dialect.select_top(limit),
            _ => None,
        };
        let count = match (self.take, row_limit) {
            (Some(take), Some(limit)) => Some(take.min(limit)),
            (take, limit) => take.or(limit),
        };
        let paged = top.is_none() && (self.skip.is_some() || count.is_some());

        if paged && dialect.paging_requires_order() && self.order_by.is_empty() {
            return Err(QueryError::DialectCapability {
                dialect: dialect.name().to_string(),
                reason: "paging requires an ORDER BY clause".to_string(),
            });
        }

        let mut sql = String::from("SELECT ");
        if let Some(top) = &top {
            sql.push_str(top);
            sql.push(' ');
        }
        sql.push_str(&format!(
            "{} FROM {}",
            self.columns_sql(dialect),
            dialect.escape_identifier(&self.table)
        ));

        if let Some(where_sql) = self.where_sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .order_by
                    .iter()
                    .map(|o| o.to_sql(dialect))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        if paged {
            sql.push(' ');
            sql.push_str(&dialect.paging_clause(self.skip.unwrap_or(0), count));
        }

        Ok(Statement {
            sql,
            params: self.params.clone(),
            cache: self.cache.clone(),
        })
    }

    /// `SELECT COUNT(*)` under the same filters; ordering, projection and
    /// paging are ignored.
    pub fn count_statement(&self, dialect: &dyn Dialect) -> Statement {
        let mut sql = format!("SELECT COUNT(*) FROM {}", dialect.escape_identifier(&self.table));
        if let Some(where_sql) = self.where_sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        Statement {
            sql,
            params: self.params.clone(),
            cache: self.cache.clone(),
        }
    }
}
