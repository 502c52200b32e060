//! Fluent query builder over one [`QueryContext`].
//!
//! ```rust,no_run
//! # use relq::prelude::*;
//! # #[derive(Default, Clone)] struct User { id: i64, name: String }
//! # impl Entity for User {
//! #     const TYPE_NAME: &'static str = "User";
//! #     fn identity(&self) -> SqlValue { self.id.into() }
//! #     fn describe(m: &mut MapperBuilder<Self>) { m.field("name", |u: &mut User, v| u.name = v); }
//! # }
//! # async fn run(engine: QueryEngine<SqliteBackend>) -> Result<()> {
//! let cancel = CancellationToken::new();
//! let active = engine
//!     .from::<User>()
//!     .filter(col("active").eq(true))?
//!     .order_by("name")
//!     .take(10)?
//!     .to_list(&cancel)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::backend::DatabaseBackend;
use crate::compiler::compile_into;
use crate::context::{CacheHint, OrderBy, QueryContext, SortDirection, Statement};
use crate::engine::QueryEngine;
use crate::error::{QueryError, Result};
use crate::mapper::{convert, mapper_for, Entity};
use crate::predicate::{Expr, MemberPath};
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Page size used when a non-positive one is requested
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// 1-based page number
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
}

impl<T> PagedResult<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size)
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    /// Page an in-memory list with the same normalisation as `paginate`.
    pub fn from_items(items: Vec<T>, page: i64, page_size: i64) -> Self {
        let (page, page_size) = normalize_page(page, page_size);
        let total_count = items.len() as u64;
        let skip = usize::try_from((page - 1).saturating_mul(page_size)).unwrap_or(usize::MAX);
        let take = usize::try_from(page_size).unwrap_or(usize::MAX);
        let items = items.into_iter().skip(skip).take(take).collect();
        Self {
            items,
            page,
            page_size,
            total_count,
        }
    }
}

fn normalize_page(page: i64, page_size: i64) -> (u64, u64) {
    let page = if page < 1 { 1 } else { page as u64 };
    let page_size = if page_size < 1 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size as u64
    };
    (page, page_size)
}

fn non_negative(what: &str, n: i64) -> Result<u64> {
    u64::try_from(n).map_err(|_| QueryError::Configuration(format!("{} must not be negative, got {}", what, n)))
}

/// Query builder for entity `E`.
///
/// Not shareable between tasks while being built; terminal operations
/// consume it.
pub struct QueryBuilder<'e, E: Entity, B: DatabaseBackend> {
    engine: &'e QueryEngine<B>,
    context: QueryContext,
    _entity: PhantomData<fn() -> E>,
}

impl<'e, E: Entity, B: DatabaseBackend> QueryBuilder<'e, E, B> {
    pub(crate) fn new(engine: &'e QueryEngine<B>) -> Self {
        Self {
            engine,
            context: QueryContext::new(E::table_name(), E::identity_column()),
            _entity: PhantomData,
        }
    }

    /// Add a predicate; multiple calls are AND-ed.
    pub fn filter(mut self, predicate: Expr) -> Result<Self> {
        let fragment = compile_into(&predicate, self.engine.dialect(), &mut self.context.params)?;
        self.context.predicates.push(fragment);
        Ok(self)
    }

    /// Ascending sort key, after any earlier ones
    pub fn order_by(self, column: &str) -> Self {
        self.order(column, SortDirection::Asc)
    }

    /// Descending sort key, after any earlier ones
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order(column, SortDirection::Desc)
    }

    fn order(mut self, column: &str, direction: SortDirection) -> Self {
        self.context.order_by.push(OrderBy {
            column: MemberPath::parse(column),
            direction,
        });
        self
    }

    pub fn skip(mut self, n: i64) -> Result<Self> {
        self.context.skip = Some(non_negative("skip", n)?);
        Ok(self)
    }

    pub fn take(mut self, n: i64) -> Result<Self> {
        self.context.take = Some(non_negative("take", n)?);
        Ok(self)
    }

    /// Narrow the projection; replaces any earlier selection.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.context.projection = columns
            .into_iter()
            .map(|c| MemberPath::parse(c.as_ref()))
            .collect();
        self
    }

    /// Hydrate a registered relation after the main query.
    pub fn include(mut self, relation: &str) -> Result<Self> {
        self.engine.relations().get::<E>(relation)?;
        if !self.context.includes.iter().any(|r| r == relation) {
            self.context.includes.push(relation.to_string());
        }
        Ok(self)
    }

    /// Attach a hint for an external cache layer.
    pub fn cache(mut self, ttl: Duration, tag: Option<&str>) -> Self {
        self.context.cache = Some(CacheHint {
            ttl,
            tag: tag.map(str::to_string),
        });
        self
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// The `SELECT` that [`to_list`](Self::to_list) would run
    pub fn to_statement(&self) -> Result<Statement> {
        self.context.select_statement(self.engine.dialect(), None)
    }

    /// The `SELECT COUNT(*)` that [`count`](Self::count) would run
    pub fn count_statement(&self) -> Statement {
        self.context.count_statement(self.engine.dialect())
    }

    pub async fn to_list(self, cancel: &CancellationToken) -> Result<Vec<E>> {
        let statement = self.to_statement()?;
        self.fetch(statement, cancel).await
    }

    /// First row, or `EmptyResult` when there is none
    pub async fn first(self, cancel: &CancellationToken) -> Result<E> {
        self.first_or_default(cancel)
            .await?
            .ok_or(QueryError::EmptyResult)
    }

    pub async fn first_or_default(self, cancel: &CancellationToken) -> Result<Option<E>> {
        let statement = self.context.select_statement(self.engine.dialect(), Some(1))?;
        Ok(self.fetch(statement, cancel).await?.into_iter().next())
    }

    pub async fn count(self, cancel: &CancellationToken) -> Result<u64> {
        count_with(self.engine, &self.count_statement(), cancel).await
    }

    /// Count, then fetch page `page` (1-based) of `page_size` rows.
    pub async fn paginate(
        mut self,
        page: i64,
        page_size: i64,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<E>> {
        let (page, page_size) = normalize_page(page, page_size);
        let skip = (page - 1).checked_mul(page_size).ok_or_else(|| {
            QueryError::Configuration(format!(
                "page {} of size {} is out of range",
                page, page_size
            ))
        })?;
        self.context.skip = Some(skip);
        self.context.take = Some(page_size);

        // Both statements are assembled before any I/O.
        let page_statement = self.to_statement()?;
        let total_count = count_with(self.engine, &self.count_statement(), cancel).await?;
        let items = self.fetch(page_statement, cancel).await?;

        Ok(PagedResult {
            items,
            page,
            page_size,
            total_count,
        })
    }

    async fn fetch(self, statement: Statement, cancel: &CancellationToken) -> Result<Vec<E>> {
        let rows = self.engine.query(&statement, cancel).await?;
        let mut entities = mapper_for::<E>().map_rows(&rows)?;

        if !self.context.includes.is_empty() && !entities.is_empty() {
            self.engine
                .loader()
                .load(&mut entities, &self.context.includes, cancel)
                .await?;
        }
        Ok(entities)
    }
}

async fn count_with<B: DatabaseBackend>(
    engine: &QueryEngine<B>,
    statement: &Statement,
    cancel: &CancellationToken,
) -> Result<u64> {
    let value = engine.scalar(statement, cancel).await?;
    convert::<u64>("COUNT(*)", &value)
}
