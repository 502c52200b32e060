use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// PostgreSQL backend over an sqlx pool.
///
/// [`SqlValue::Null`] binds as a text-typed NULL; cast the marker
/// (`$1::BIGINT`) where the target is not text.
pub struct PostgresBackend {
    pool: PgPool,
    // Connection pinned by an open transaction
    tx: Mutex<Option<PoolConnection<Postgres>>>,
    in_transaction: AtomicBool,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn bind_params<'q>(sql: &'q str, params: &[SqlValue]) -> Query<'q, Postgres, PgArguments> {
        params.iter().fold(sqlx::query(sql), |query, value| match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Bytes(b) => query.bind(b.clone()),
            SqlValue::Decimal(d) => query.bind(*d),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::TimestampTz(ts) => query.bind(*ts),
            SqlValue::Uuid(u) => query.bind(*u),
            SqlValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        })
    }

    /// Convert PostgreSQL row to QueryRow
    fn convert_row(row: &PgRow) -> Result<QueryRow> {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let i = column.ordinal();
            if row.try_get_raw(i)?.is_null() {
                query_row.insert(column.name(), SqlValue::Null);
                continue;
            }

            let type_name = column.type_info().name();
            let value = match type_name {
                "BOOL" => SqlValue::Bool(row.try_get(i)?),
                "INT2" => SqlValue::Int(row.try_get::<i16, _>(i)?.into()),
                "INT4" => SqlValue::Int(row.try_get::<i32, _>(i)?.into()),
                "INT8" => SqlValue::Int(row.try_get(i)?),
                "FLOAT4" => SqlValue::Float(row.try_get::<f32, _>(i)?.into()),
                "FLOAT8" => SqlValue::Float(row.try_get(i)?),
                "NUMERIC" => SqlValue::Decimal(row.try_get::<Decimal, _>(i)?),
                "BYTEA" => SqlValue::Bytes(row.try_get(i)?),
                "TIMESTAMP" => SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(i)?),
                "TIMESTAMPTZ" => SqlValue::TimestampTz(row.try_get::<DateTime<Utc>, _>(i)?),
                "DATE" => SqlValue::Timestamp(row.try_get::<NaiveDate, _>(i)?.and_time(chrono::NaiveTime::MIN)),
                "UUID" => SqlValue::Uuid(row.try_get::<Uuid, _>(i)?),
                "JSON" | "JSONB" => SqlValue::Json(row.try_get::<serde_json::Value, _>(i)?),
                _ => match row.try_get::<String, _>(i) {
                    Ok(text) => SqlValue::Text(text),
                    Err(_) => {
                        return Err(QueryError::TypeConversion {
                            column: column.name().to_string(),
                            source_type: type_name.to_string(),
                            target_type: "SqlValue".to_string(),
                        })
                    }
                },
            };

            query_row.insert(column.name(), value);
        }

        Ok(query_row)
    }

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

#[async_trait]
impl DatabaseBackend for PostgresBackend {
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
        sqlx::query("BEGIN").execute(&mut *conn).await?;
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
