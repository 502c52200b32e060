use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use async_trait::async_trait;

/// Row from a query result.
///
/// Columns keep their result order; lookups by name ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: Vec<(String, SqlValue)>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a column value
    pub fn insert(&mut self, key: impl Into<String>, value: SqlValue) {
        let key = key.into();
        match self.position(&key) {
            Some(i) => self.columns[i].1 = value,
            None => self.columns.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SqlValue> {
        self.position(key).map(|i| &self.columns[i].1)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SqlValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(key))
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for QueryRow {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        let mut row = QueryRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Data access collaborator.
///
/// The query layer hands over SQL text and positional parameters and never
/// owns the connection. Receivers are shared so independent statements (such
/// as relation batches) may be in flight at the same time.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Execute a SQL statement and return the affected row count
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Query and return results
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Query a single value: the first column of the first row
    async fn scalar(&self, sql: &str, params: &[SqlValue]) -> Result<SqlValue> {
        let rows = self.query(sql, params).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next())
            .map(|(_, value)| value)
            .ok_or(QueryError::EmptyResult)
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

/// Transaction guard.
///
/// Call [`Transaction::commit`] or [`Transaction::rollback`] explicitly; a
/// guard dropped while still open only logs, since rollback is async.
pub struct Transaction<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
    finished: bool,
}

impl<'a, B: DatabaseBackend + ?Sized> Transaction<'a, B> {
    pub async fn new(backend: &'a B) -> Result<Self> {
        backend.begin_transaction().await?;
        tracing::info!(event = "begin", "relq.transaction");
        Ok(Self {
            backend,
            finished: false,
        })
    }

    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.backend.commit().await?;
        tracing::info!(event = "commit", "relq.transaction");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.backend.rollback().await?;
        tracing::info!(event = "rollback", "relq.transaction");
        Ok(())
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.backend.execute(sql, params).await
    }

    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.backend.query(sql, params).await
    }
}

impl<B: DatabaseBackend + ?Sized> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if !self.finished {
            // Can't await a rollback here; the backend stays in the
            // transaction until it is committed or rolled back directly.
            tracing::warn!("relq.transaction dropped without commit or rollback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn test_row_lookup_ignores_case() {
        let row: QueryRow = vec![
            ("Id", SqlValue::Int(1)),
            ("NAME", SqlValue::Text("Alice".into())),
        ]
        .into_iter()
        .collect();

        assert_eq!(row.get_i64("id"), Some(1));
        assert_eq!(row.get_string("name"), Some("Alice".to_string()));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_insert_replaces() {
        let mut row = QueryRow::new();
        row.insert("active", SqlValue::Int(1));
        row.insert("ACTIVE", SqlValue::Bool(false));

        assert_eq!(row.len(), 1);
        assert_eq!(row.get_bool("active"), Some(false));
    }

    #[tokio::test]
    async fn test_scalar_takes_first_cell() {
        let backend = MockBackend::new();
        backend.push_rows(vec![vec![("count", SqlValue::Int(42)), ("other", SqlValue::Int(1))]]);

        let value = backend.scalar("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(value, SqlValue::Int(42));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let backend = MockBackend::new();

        let tx = Transaction::new(&backend).await.unwrap();
        tx.execute("UPDATE accounts SET balance = ?1", &[SqlValue::Int(5)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let tx = Transaction::new(&backend).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(
            backend.transaction_log(),
            vec!["begin", "commit", "begin", "rollback"]
        );
    }
}
