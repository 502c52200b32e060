use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub struct SqliteBackend {
    pool: SqlitePool,
    // Connection pinned by an open transaction
    tx: Mutex<Option<PoolConnection<Sqlite>>>,
    in_transaction: AtomicBool,
}

impl SqliteBackend {
    /// Create a new SQLite backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // Set WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        Ok(Self::with_pool(pool))
    }

    /// Create an in-memory SQLite database.
    ///
    /// Each connection to `:memory:` is its own database, so the pool holds
    /// exactly one connection for its whole life.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool))
    }

    /// Create a file-based SQLite database
    pub async fn file(path: &str) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path)).await
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn bind_params<'q>(
        sql: &'q str,
        params: &[SqlValue],
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        params.iter().fold(sqlx::query(sql), |query, value| match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Bytes(b) => query.bind(b.clone()),
            // No native decimal or uuid storage; both round-trip as text.
            SqlValue::Decimal(d) => query.bind(d.to_string()),
            SqlValue::Uuid(u) => query.bind(u.hyphenated().to_string()),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::TimestampTz(ts) => query.bind(*ts),
            SqlValue::Json(v) => query.bind(v.to_string()),
        })
    }

    /// Convert SQLite row to QueryRow
    fn convert_row(row: &SqliteRow) -> Result<QueryRow> {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let i = column.ordinal();
            let raw = row.try_get_raw(i)?;

            let value = if raw.is_null() {
                SqlValue::Null
            } else {
                // Storage class of this value; the declared type only
                // refines booleans.
                let storage = raw.type_info().name().to_string();
                match storage.as_str() {
                    "INTEGER" if column.type_info().name() == "BOOLEAN" => {
                        SqlValue::Bool(row.try_get_unchecked::<i64, _>(i)? != 0)
                    }
                    "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?),
                    "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
                    "BLOB" => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                    _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
                }
            };

            query_row.insert(column.name(), value);
        }

        Ok(query_row)
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let query = Self::bind_params(sql, params);

        if self.in_transaction.load(Ordering::Acquire) {
            let mut tx = self.tx.lock().await;
            if let Some(conn) = tx.as_mut() {
                return Ok(query.execute(&mut **conn).await?.rows_affected());
            }
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let query = Self::bind_params(sql, params);

        let rows = if self.in_transaction.load(Ordering::Acquire) {
            let mut tx = self.tx.lock().await;
            match tx.as_mut() {
                Some(conn) => query.fetch_all(&mut **conn).await?,
                None => query.fetch_all(&self.pool).await?,
            }
        } else {
            query.fetch_all(&self.pool).await?
        };

        rows.iter().map(Self::convert_row).collect()
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut tx = self.tx.lock().await;
        if tx.is_some() {
            return Err(QueryError::Transaction(
                "Already in transaction".to_string(),
            ));
        }

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN TRANSACTION").execute(&mut *conn).await?;
        *tx = Some(conn);
        self.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }
}

impl SqliteBackend {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut tx = self.tx.lock().await;
        let Some(mut conn) = tx.take() else {
            return Err(QueryError::Transaction("Not in transaction".to_string()));
        };
        self.in_transaction.store(false, Ordering::Release);
        sqlx::query(statement).execute(&mut *conn).await?;
        Ok(())
    }
}
