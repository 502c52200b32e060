use crate::dialect::DialectKind;
use crate::error::{QueryError, Result};
use serde::Deserialize;
use std::env;

/// Largest identifier list a single relation batch binds
pub const DEFAULT_IN_LIST_CHUNK_SIZE: usize = 500;

/// Configuration for a query engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// SQL dialect profile of the target backend
    pub dialect: DialectKind,
    /// Maximum identifiers per `IN (...)` list when hydrating relations
    pub in_list_chunk_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::default(),
            in_list_chunk_size: DEFAULT_IN_LIST_CHUNK_SIZE,
        }
    }
}

impl QueryConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, in_list_chunk_size: usize) -> Self {
        self.in_list_chunk_size = in_list_chunk_size;
        self
    }

    /// Defaults overridden by `RELQ_DIALECT` and `RELQ_IN_CHUNK_SIZE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dialect) = env::var("RELQ_DIALECT") {
            config.dialect = dialect.parse()?;
        }

        if let Ok(chunk) = env::var("RELQ_IN_CHUNK_SIZE") {
            config.in_list_chunk_size = chunk.trim().parse().map_err(|_| {
                QueryError::Configuration(format!("RELQ_IN_CHUNK_SIZE is not a number: {}", chunk))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_list_chunk_size == 0 {
            return Err(QueryError::Configuration(
                "in_list_chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
