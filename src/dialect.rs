//! SQL dialect profiles.
//!
//! A [`Dialect`] owns every backend-specific piece of syntax the query layer
//! emits: identifier quoting, parameter markers, the paging clause and literal
//! quoting. Builders receive the profile by reference, so supporting a new
//! backend means adding a profile here and nothing else.

use crate::error::{QueryError, Result};
use crate::value::{SqlValue, TIMESTAMP_FORMAT};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Backend-specific SQL syntax rules.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Profile name used in diagnostics
    fn name(&self) -> &'static str;

    /// Quote an identifier, doubling any embedded closing quote
    fn escape_identifier(&self, name: &str) -> String;

    /// Marker for the `index`-th bound parameter (1-based)
    fn parameter_marker(&self, index: usize) -> String;

    /// Paging clause for `offset` rows skipped and at most `count` returned.
    ///
    /// `None` means no upper bound.
    fn paging_clause(&self, offset: u64, count: Option<u64>) -> String;

    /// Whether the paging clause is only valid after an ORDER BY
    fn paging_requires_order(&self) -> bool {
        false
    }

    /// Row cap placed right after `SELECT` (`TOP n`), for dialects that have
    /// one. Used when only a row limit is needed, with no offset.
    fn select_top(&self, _count: u64) -> Option<String> {
        None
    }

    /// Quote a string literal
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Concatenate SQL fragments into one string expression
    fn concat(&self, parts: &[String]) -> String {
        format!("({})", parts.join(" || "))
    }

    /// Escape LIKE wildcards in `value` using `!` as the escape character
    fn escape_like(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, '!' | '%' | '_') {
                out.push('!');
            }
            out.push(c);
        }
        out
    }

    /// Render a value as an inline literal.
    ///
    /// Only used for diagnostics; generated statements always bind values.
    fn format_literal(&self, value: &SqlValue) -> String {
        render_literal(self, value)
    }
}

fn render_literal<D: Dialect + ?Sized>(dialect: &D, value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => dialect.quote_literal(s),
        SqlValue::Timestamp(ts) => dialect.quote_literal(&ts.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::TimestampTz(ts) => {
            dialect.quote_literal(&ts.naive_utc().format(TIMESTAMP_FORMAT).to_string())
        }
        SqlValue::Uuid(u) => dialect.quote_literal(&u.hyphenated().to_string()),
        SqlValue::Json(v) => dialect.quote_literal(&v.to_string()),
        SqlValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("X'{}'", hex)
        }
    }
}

fn quote_with(name: &str, open: char, close: char) -> String {
    let doubled = format!("{}{}", close, close);
    format!("{}{}{}", open, name.replace(close, &doubled), close)
}

/// SQLite: `"ident"`, `?N`, `LIMIT offset, count`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_with(name, '"', '"')
    }

    fn parameter_marker(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn paging_clause(&self, offset: u64, count: Option<u64>) -> String {
        match count {
            Some(count) => format!("LIMIT {}, {}", offset, count),
            None => format!("LIMIT {}, -1", offset),
        }
    }
}

/// MySQL: `` `ident` ``, `?`, `LIMIT offset, count`
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_with(name, '`', '`')
    }

    fn parameter_marker(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn paging_clause(&self, offset: u64, count: Option<u64>) -> String {
        // MySQL has no unbounded form; the manual recommends the max u64.
        format!("LIMIT {}, {}", offset, count.unwrap_or(u64::MAX))
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }
}

/// PostgreSQL: `"ident"`, `$N`, `LIMIT count OFFSET offset`
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_with(name, '"', '"')
    }

    fn parameter_marker(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn paging_clause(&self, offset: u64, count: Option<u64>) -> String {
        match count {
            Some(count) => format!("LIMIT {} OFFSET {}", count, offset),
            None => format!("LIMIT ALL OFFSET {}", offset),
        }
    }

    fn format_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("'\\x{}'", hex)
            }
            other => render_literal(self, other),
        }
    }
}

/// SQL Server: `[ident]`, `@pN`, `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_with(name, '[', ']')
    }

    fn parameter_marker(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn paging_clause(&self, offset: u64, count: Option<u64>) -> String {
        match count {
            Some(count) => format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, count),
            None => format!("OFFSET {} ROWS", offset),
        }
    }

    fn paging_requires_order(&self) -> bool {
        true
    }

    fn select_top(&self, count: u64) -> Option<String> {
        Some(format!("TOP {}", count))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("N'{}'", value.replace('\'', "''"))
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn escape_like(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, '!' | '%' | '_' | '[') {
                out.push('!');
            }
            out.push(c);
        }
        out
    }
}

/// The fixed set of supported dialect profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    MySql,
    Postgres,
    SqlServer,
}

impl DialectKind {
    /// Shared profile instance for this kind
    pub fn profile(self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Sqlite => Arc::new(SqliteDialect),
            DialectKind::MySql => Arc::new(MySqlDialect),
            DialectKind::Postgres => Arc::new(PostgresDialect),
            DialectKind::SqlServer => Arc::new(SqlServerDialect),
        }
    }
}

impl FromStr for DialectKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DialectKind::Sqlite),
            "mysql" => Ok(DialectKind::MySql),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "sqlserver" | "mssql" => Ok(DialectKind::SqlServer),
            other => Err(QueryError::Configuration(format!(
                "Unknown dialect: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::Sqlite => write!(f, "sqlite"),
            DialectKind::MySql => write!(f, "mysql"),
            DialectKind::Postgres => write!(f, "postgres"),
            DialectKind::SqlServer => write!(f, "sqlserver"),
        }
    }
}
