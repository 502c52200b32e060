//! relq - Typed queries and batched relation loading over SQL backends
//!
//! relq turns predicate expressions built in Rust into parameterized,
//! dialect-correct SQL, maps result rows onto entity types and hydrates
//! declared associations without issuing one query per parent row.
//!
//! # Architecture
//!
//! - **Predicate → SQL**: an explicit expression tree compiled into
//!   parenthesized fragments with out-of-band bound parameters
//! - **Dialect Profiles**: identifier quoting, parameter markers and paging
//!   syntax for SQLite, MySQL, PostgreSQL and SQL Server
//! - **Row Mapping**: per-type mappers built once and cached for the process
//! - **Relation Loading**: one batched `IN` query per include, regardless of
//!   how many parents were fetched
//!
//! # Example
//!
//! ```rust,no_run
//! use relq::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Clone)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     posts: Vec<Post>,
//! }
//!
//! #[derive(Debug, Default, Clone)]
//! struct Post {
//!     id: i64,
//!     user_id: i64,
//!     title: String,
//! }
//!
//! impl Entity for User {
//!     const TYPE_NAME: &'static str = "User";
//!     fn identity(&self) -> SqlValue { self.id.into() }
//!     fn describe(m: &mut MapperBuilder<Self>) {
//!         m.field("id", |u: &mut User, v| u.id = v)
//!             .field("name", |u: &mut User, v| u.name = v);
//!     }
//! }
//!
//! impl Entity for Post {
//!     const TYPE_NAME: &'static str = "Post";
//!     fn identity(&self) -> SqlValue { self.id.into() }
//!     fn describe(m: &mut MapperBuilder<Self>) {
//!         m.field("id", |p: &mut Post, v| p.id = v)
//!             .field("user_id", |p: &mut Post, v| p.user_id = v)
//!             .field("title", |p: &mut Post, v| p.title = v);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut relations = RelationRegistry::new();
//!     relations.has_many::<User, Post, _>("posts", "user_id", |u, posts| u.posts = posts)?;
//!
//!     let backend = SqliteBackend::file("app.db").await?;
//!     let engine = QueryEngine::with_config(backend, QueryConfig::from_env()?)?
//!         .with_relations(Arc::new(relations));
//!
//!     let cancel = CancellationToken::new();
//!     let users = engine
//!         .from::<User>()
//!         .filter(col("name").starts_with("A"))?
//!         .order_by("name")
//!         .include("posts")?
//!         .to_list(&cancel)
//!         .await?;
//!
//!     println!("{} users", users.len());
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! Enable backends via Cargo features:
//!
//! ```toml
//! [dependencies]
//! relq = { version = "0.1", features = ["postgres", "sqlite"] }
//! ```
//!
//! MySQL and SQL Server statements can be assembled with
//! [`QueryBuilder::to_statement`] and run by any [`DatabaseBackend`].
//!
//! PostgreSQL infers a type for every parameter, and a bound
//! [`SqlValue::Null`] is sent as a text-typed NULL. Statements that place a
//! NULL parameter in a non-text position (an arithmetic operand, a numeric
//! or temporal column) need an explicit cast such as `$1::BIGINT`. Predicate
//! comparisons against NULL compile to `IS NULL` and bind nothing.

pub mod backend;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod predicate;
pub mod query;
pub mod relation;
pub mod value;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod mock;

pub use backend::{DatabaseBackend, QueryResult, QueryRow, Transaction};
pub use compiler::{compile, CompiledPredicate};
pub use config::QueryConfig;
pub use context::{CacheHint, OrderBy, QueryContext, SortDirection, Statement};
pub use dialect::{
    Dialect, DialectKind, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect,
};
pub use engine::QueryEngine;
pub use error::{QueryError, Result};
pub use loader::RelationLoader;
pub use mapper::{Entity, EntityMapper, FromSqlValue, MapperBuilder};
pub use predicate::{col, lit, CallKind, ComparisonOp, Expr, MemberPath};
pub use query::{PagedResult, QueryBuilder};
pub use relation::{Cardinality, RelationConfig, RelationRegistry};
pub use value::SqlValue;

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::config::QueryConfig;
    pub use crate::dialect::{Dialect, DialectKind};
    pub use crate::engine::QueryEngine;
    pub use crate::error::{QueryError, Result};
    pub use crate::mapper::{Entity, MapperBuilder};
    pub use crate::predicate::{col, lit, Expr};
    pub use crate::query::PagedResult;
    pub use crate::relation::RelationRegistry;
    pub use crate::value::SqlValue;
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PostgresBackend;

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteBackend;
}
