//! Batched hydration of declared relations.
//!
//! For each include the loader collects the distinct parent identities,
//! fetches every matching child with one `IN` query (split only when the
//! list exceeds the configured chunk size), groups the children by foreign
//! key and attaches them to the parents. Fetches for independent includes
//! run concurrently; nothing is attached until all of them succeed.

use crate::backend::{DatabaseBackend, QueryResult};
use crate::compiler::compile;
use crate::context::Statement;
use crate::engine::QueryEngine;
use crate::error::Result;
use crate::mapper::Entity;
use crate::predicate::col;
use crate::relation::RelationConfig;
use crate::value::SqlValue;
use futures::future::try_join_all;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

pub struct RelationLoader<'e, B: DatabaseBackend> {
    engine: &'e QueryEngine<B>,
}

impl<'e, B: DatabaseBackend> RelationLoader<'e, B> {
    pub fn new(engine: &'e QueryEngine<B>) -> Self {
        Self { engine }
    }

    /// Hydrate `includes` on `parents`.
    ///
    /// On error `parents` is left exactly as it was passed in.
    pub async fn load<P: Entity>(
        &self,
        parents: &mut [P],
        includes: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if parents.is_empty() || includes.is_empty() {
            return Ok(());
        }

        let associations = includes
            .iter()
            .map(|name| self.engine.relations().association::<P>(name))
            .collect::<Result<Vec<_>>>()?;

        let ids = distinct_identities(parents);
        let ids = ids.as_slice();

        let fetches = associations.into_iter().map(|association| async move {
            let rows = self.fetch(association.config(), ids, cancel).await?;
            association.prepare(&rows)
        });
        let prepared = try_join_all(fetches).await?;

        for relation in prepared {
            relation.apply(parents);
        }
        Ok(())
    }

    /// Child rows for `ids`, chunk results concatenated in chunk order.
    pub async fn fetch(
        &self,
        config: &RelationConfig,
        ids: &[SqlValue],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let statements = self.batch_statements(config, ids)?;

        tracing::debug!(
            relation = %config.name,
            child = %config.child_table,
            parents = ids.len(),
            chunks = statements.len(),
            "relq.relation batch"
        );

        let chunks = try_join_all(statements.iter().map(|s| self.engine.query(s, cancel))).await?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// `SELECT * FROM child WHERE fk IN (...)`, one per chunk of `ids`
    pub fn batch_statements(&self, config: &RelationConfig, ids: &[SqlValue]) -> Result<Vec<Statement>> {
        let dialect = self.engine.dialect();
        let table = dialect.escape_identifier(&config.child_table);

        ids.chunks(self.engine.config().in_list_chunk_size.max(1))
            .map(|chunk| {
                let filter = compile(&col(&config.foreign_key).is_in(chunk.iter().cloned()), dialect)?;
                Ok(Statement::new(
                    format!("SELECT * FROM {} WHERE {}", table, filter.sql),
                    filter.params,
                ))
            })
            .collect()
    }
}

/// Non-null parent identities, first occurrence order
fn distinct_identities<P: Entity>(parents: &[P]) -> Vec<SqlValue> {
    let mut seen = HashSet::new();
    parents
        .iter()
        .map(P::identity)
        .filter(|id| id.join_key().is_some_and(|key| seen.insert(key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::error::QueryError;
    use crate::mapper::MapperBuilder;
    use crate::mock::MockBackend;
    use crate::relation::RelationRegistry;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone)]
    struct Customer {
        id: i64,
        orders: Vec<Order>,
        profile: Option<Profile>,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Order {
        id: i64,
        customer_id: i64,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Profile {
        customer_id: i64,
        tier: String,
    }

    impl Entity for Customer {
        const TYPE_NAME: &'static str = "Customer";
        fn identity(&self) -> SqlValue {
            self.id.into()
        }
        fn describe(m: &mut MapperBuilder<Self>) {
            m.field("id", |e: &mut Self, v| e.id = v);
        }
    }

    impl Entity for Order {
        const TYPE_NAME: &'static str = "Order";
        fn identity(&self) -> SqlValue {
            self.id.into()
        }
        fn describe(m: &mut MapperBuilder<Self>) {
            m.field("id", |e: &mut Self, v| e.id = v)
                .field("customer_id", |e: &mut Self, v| e.customer_id = v);
        }
    }

    impl Entity for Profile {
        const TYPE_NAME: &'static str = "Profile";
        fn identity(&self) -> SqlValue {
            self.customer_id.into()
        }
        fn describe(m: &mut MapperBuilder<Self>) {
            m.field("customer_id", |e: &mut Self, v| e.customer_id = v)
                .field("tier", |e: &mut Self, v| e.tier = v);
        }
    }

    fn engine(backend: MockBackend, chunk_size: usize) -> QueryEngine<MockBackend> {
        let mut registry = RelationRegistry::new();
        registry
            .has_many::<Customer, Order, _>("orders", "customer_id", |c, o| c.orders = o)
            .unwrap()
            .has_one::<Customer, Profile, _>("profile", "customer_id", |c, p| c.profile = p)
            .unwrap();
        QueryEngine::with_config(backend, QueryConfig::default().with_chunk_size(chunk_size))
            .unwrap()
            .with_relations(Arc::new(registry))
    }

    fn customers(n: i64) -> Vec<Customer> {
        (1..=n).map(|id| Customer { id, ..Default::default() }).collect()
    }

    fn order_rows(backend: &MockBackend) {
        backend.route_keyed(
            "FROM \"orders\"",
            "customer_id",
            vec![
                vec![("id", SqlValue::Int(100)), ("customer_id", SqlValue::Int(2))],
                vec![("id", SqlValue::Int(101)), ("customer_id", SqlValue::Int(1))],
                vec![("id", SqlValue::Int(102)), ("customer_id", SqlValue::Int(2))],
            ],
        );
    }

    #[tokio::test]
    async fn test_one_query_per_include() {
        let backend = MockBackend::new();
        order_rows(&backend);
        backend.route_keyed(
            "FROM \"profiles\"",
            "customer_id",
            vec![
                vec![("customer_id", SqlValue::Int(1)), ("tier", SqlValue::Text("gold".into()))],
                vec![("customer_id", SqlValue::Int(1)), ("tier", SqlValue::Text("silver".into()))],
            ],
        );
        let engine = engine(backend, 500);

        let mut parents = customers(3);
        engine
            .loader()
            .load(
                &mut parents,
                &["orders".to_string(), "profile".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let executed = engine.backend().executed();
        assert_eq!(executed.len(), 2);
        let orders_sql = executed.iter().find(|(sql, _)| sql.contains("orders")).unwrap();
        assert_eq!(
            orders_sql.0,
            "SELECT * FROM \"orders\" WHERE (\"customer_id\" IN (?1, ?2, ?3))"
        );
        assert_eq!(orders_sql.1, vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]);

        let ids = |c: &Customer| c.orders.iter().map(|o| o.id).collect::<Vec<_>>();
        assert_eq!(ids(&parents[0]), vec![101]);
        assert_eq!(ids(&parents[1]), vec![100, 102]);
        assert!(parents[2].orders.is_empty());

        assert_eq!(parents[0].profile.as_ref().map(|p| p.tier.as_str()), Some("gold"));
        assert_eq!(parents[1].profile, None);
    }

    #[tokio::test]
    async fn test_query_count_independent_of_parent_count() {
        let backend = MockBackend::new();
        order_rows(&backend);
        let engine = engine(backend, 500);

        let mut many = customers(1000);
        engine
            .loader()
            .load(&mut many, &["orders".to_string()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.backend().executed().len(), 1);
        assert_eq!(many[1].orders.len(), 2);
    }

    #[tokio::test]
    async fn test_chunked_identifier_lists() {
        let backend = MockBackend::new();
        order_rows(&backend);
        let engine = engine(backend, 2);

        let mut parents = customers(5);
        engine
            .loader()
            .load(&mut parents, &["orders".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        // ceil(5 / 2)
        assert_eq!(engine.backend().executed().len(), 3);
        let ids: Vec<_> = parents[1].orders.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![100, 102]);
    }

    #[test]
    fn test_duplicate_and_null_identities_bound_once() {
        #[derive(Debug, Default, Clone)]
        struct Tag {
            id: Option<i64>,
        }
        impl Entity for Tag {
            const TYPE_NAME: &'static str = "Tag";
            fn identity(&self) -> SqlValue {
                self.id.into()
            }
            fn describe(m: &mut MapperBuilder<Self>) {
                m.field("id", |e: &mut Self, v| e.id = v);
            }
        }

        let tags = vec![Tag { id: Some(2) }, Tag { id: None }, Tag { id: Some(2) }, Tag { id: Some(1) }];
        assert_eq!(distinct_identities(&tags), vec![SqlValue::Int(2), SqlValue::Int(1)]);
    }

    #[tokio::test]
    async fn test_failure_leaves_parents_untouched() {
        let backend = MockBackend::new();
        order_rows(&backend);
        backend.fail_on("FROM \"profiles\"", "connection reset");
        let engine = engine(backend, 500);

        let mut parents = customers(2);
        let err = engine
            .loader()
            .load(
                &mut parents,
                &["orders".to_string(), "profile".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Execution { .. }));
        assert!(parents.iter().all(|c| c.orders.is_empty() && c.profile.is_none()));
    }

    #[tokio::test]
    async fn test_unknown_include_fails_before_io() {
        let engine = engine(MockBackend::new(), 500);
        let mut parents = customers(2);
        let err = engine
            .loader()
            .load(&mut parents, &["invoices".to_string()], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::UnknownRelation { .. }));
        assert!(engine.backend().executed().is_empty());
    }
}
