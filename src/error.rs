use crate::value::SqlValue;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    /// A predicate node the compiler cannot express in SQL.
    #[error("Cannot translate expression node `{node}`: {reason}")]
    ExpressionTranslation { node: String, reason: String },

    #[error("Unknown relation `{relation}` for entity `{entity}`")]
    UnknownRelation { entity: String, relation: String },

    #[error("Dialect {dialect} cannot express this query: {reason}")]
    DialectCapability { dialect: String, reason: String },

    #[error("Cannot convert column `{column}` from {source_type} to {target_type}")]
    TypeConversion {
        column: String,
        source_type: String,
        target_type: String,
    },

    /// A data-access failure, carrying the statement that triggered it.
    #[error("Execution failed for `{sql}` ({} parameters): {source}", .params.len())]
    Execution {
        sql: String,
        params: Vec<SqlValue>,
        #[source]
        source: Box<QueryError>,
    },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query returned no rows")]
    EmptyResult,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl QueryError {
    pub(crate) fn translation(node: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::ExpressionTranslation {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conversion(column: &str, source: &SqlValue, target: &str) -> Self {
        QueryError::TypeConversion {
            column: column.to_string(),
            source_type: source.type_name().to_string(),
            target_type: target.to_string(),
        }
    }

    /// True for errors raised while assembling a statement, before any I/O.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            QueryError::ExpressionTranslation { .. }
                | QueryError::UnknownRelation { .. }
                | QueryError::DialectCapability { .. }
                | QueryError::Configuration(_)
        )
    }

    /// Unwraps an `Execution` wrapper down to the data-access failure.
    pub fn root_cause(&self) -> &QueryError {
        match self {
            QueryError::Execution { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
