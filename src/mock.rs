//! In-memory backend that records statements, for unit tests.

use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{QueryError, Result};
use crate::value::SqlValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

struct Route {
    fragment: String,
    key_column: Option<String>,
    rows: QueryResult,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    executed: Mutex<Vec<(String, Vec<SqlValue>)>>,
    queued: Mutex<VecDeque<QueryResult>>,
    routes: Mutex<Vec<Route>>,
    failures: Mutex<Vec<(String, String)>>,
    hanging: Mutex<Vec<String>>,
    transactions: Mutex<Vec<&'static str>>,
}

pub(crate) fn rows(data: Vec<Vec<(&str, SqlValue)>>) -> QueryResult {
    data.into_iter()
        .map(|cols| cols.into_iter().collect::<QueryRow>())
        .collect()
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result for the next query that matches no route
    pub fn push_rows(&self, data: Vec<Vec<(&str, SqlValue)>>) {
        self.queued.lock().push_back(rows(data));
    }

    /// Answer every query containing `fragment` with `data`
    pub fn route(&self, fragment: &str, data: Vec<Vec<(&str, SqlValue)>>) {
        self.routes.lock().push(Route {
            fragment: fragment.to_string(),
            key_column: None,
            rows: rows(data),
        });
    }

    /// Like [`route`](Self::route), keeping only rows whose `key_column`
    /// matches one of the bound parameters, as an `IN` list would.
    pub fn route_keyed(&self, fragment: &str, key_column: &str, data: Vec<Vec<(&str, SqlValue)>>) {
        self.routes.lock().push(Route {
            fragment: fragment.to_string(),
            key_column: Some(key_column.to_string()),
            rows: rows(data),
        });
    }

    pub fn fail_on(&self, fragment: &str, message: &str) {
        self.failures
            .lock()
            .push((fragment.to_string(), message.to_string()));
    }

    /// Queries containing `fragment` never complete
    pub fn hang_on(&self, fragment: &str) {
        self.hanging.lock().push(fragment.to_string());
    }

    pub fn executed(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.executed.lock().clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn transaction_log(&self) -> Vec<&'static str> {
        self.transactions.lock().clone()
    }

    fn respond(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.executed.lock().push((sql.to_string(), params.to_vec()));

        if let Some((_, message)) = self
            .failures
            .lock()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
        {
            return Err(QueryError::Database(message.clone()));
        }

        let routes = self.routes.lock();
        if let Some(route) = routes.iter().find(|r| sql.contains(r.fragment.as_str())) {
            let Some(key_column) = &route.key_column else {
                return Ok(route.rows.clone());
            };
            let keys: HashSet<String> = params.iter().filter_map(SqlValue::join_key).collect();
            return Ok(route
                .rows
                .iter()
                .filter(|row| {
                    row.get(key_column)
                        .and_then(SqlValue::join_key)
                        .is_some_and(|k| keys.contains(&k))
                })
                .cloned()
                .collect());
        }
        drop(routes);

        Ok(self.queued.lock().pop_front().unwrap_or_default())
    }

    fn hangs(&self, sql: &str) -> bool {
        self.hanging.lock().iter().any(|f| sql.contains(f.as_str()))
    }
}

#[async_trait]
impl DatabaseBackend for MockBackend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.respond(sql, params).map(|rows| rows.len() as u64)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        if self.hangs(sql) {
            self.executed.lock().push((sql.to_string(), params.to_vec()));
            futures::future::pending::<()>().await;
        }
        self.respond(sql, params)
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transactions.lock().push("begin");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.transactions.lock().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.transactions.lock().push("rollback");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}
