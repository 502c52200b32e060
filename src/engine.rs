use crate::backend::{DatabaseBackend, QueryResult, Transaction};
use crate::config::QueryConfig;
use crate::context::Statement;
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::loader::RelationLoader;
use crate::mapper::Entity;
use crate::query::QueryBuilder;
use crate::relation::RelationRegistry;
use crate::value::SqlValue;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point: a backend, its dialect profile and the relation registry.
///
/// Every statement runs through the engine, which attaches the SQL and
/// parameters to data-access failures and abandons I/O on cancellation.
pub struct QueryEngine<B: DatabaseBackend> {
    backend: Arc<B>,
    dialect: Arc<dyn Dialect>,
    relations: Arc<RelationRegistry>,
    config: QueryConfig,
}

impl<B: DatabaseBackend> Clone for QueryEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            dialect: Arc::clone(&self.dialect),
            relations: Arc::clone(&self.relations),
            config: self.config.clone(),
        }
    }
}

impl<B: DatabaseBackend> QueryEngine<B> {
    /// Create an engine with the default configuration
    pub fn new(backend: B) -> Self {
        let config = QueryConfig::default();
        Self {
            backend: Arc::new(backend),
            dialect: config.dialect.profile(),
            relations: Arc::new(RelationRegistry::new()),
            config,
        }
    }

    /// Create an engine with a custom config
    pub fn with_config(backend: B, config: QueryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            dialect: config.dialect.profile(),
            relations: Arc::new(RelationRegistry::new()),
            config,
        })
    }

    pub fn with_relations(mut self, relations: Arc<RelationRegistry>) -> Self {
        self.relations = relations;
        self
    }

    /// Use a dialect profile outside the built-in set
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Start a query over `E`'s table
    pub fn from<E: Entity>(&self) -> QueryBuilder<'_, E, B> {
        QueryBuilder::new(self)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn relations(&self) -> &RelationRegistry {
        &self.relations
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn loader(&self) -> RelationLoader<'_, B> {
        RelationLoader::new(self)
    }

    /// Begin a transaction on the backend
    pub async fn transaction(&self) -> Result<Transaction<'_, B>> {
        Transaction::new(self.backend.as_ref()).await
    }

    pub async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<QueryResult> {
        self.run(statement, cancel, self.backend.query(&statement.sql, &statement.params))
            .await
    }

    pub async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        self.run(statement, cancel, self.backend.execute(&statement.sql, &statement.params))
            .await
    }

    pub async fn scalar(&self, statement: &Statement, cancel: &CancellationToken) -> Result<SqlValue> {
        self.run(statement, cancel, self.backend.scalar(&statement.sql, &statement.params))
            .await
    }

    async fn run<T, F>(&self, statement: &Statement, cancel: &CancellationToken, io: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        tracing::debug!(
            sql = %statement.sql,
            params = ?statement.params,
            cache_ttl_ms = statement.cache.as_ref().map(|c| c.ttl.as_millis() as u64),
            cache_tag = statement.cache.as_ref().and_then(|c| c.tag.as_deref()),
            "relq.query"
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            outcome = io => outcome,
        };

        outcome.map_err(|source| {
            tracing::debug!(sql = %statement.sql, error = %source, "relq.query failed");
            QueryError::Execution {
                sql: statement.sql.clone(),
                params: statement.params.clone(),
                source: Box::new(source),
            }
        })
    }
}
