use async_trait::async_trait;
use serde::Serialize;
use viewchat_core::{Value, ViewchatError};

use crate::ReadOnlyGuard;

/// One result row, column name to value, in select-list order.
pub type Row = serde_json::Map<String, Value>;

/// Rows returned for a statement. An empty result means "no data", not an
/// error.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows as a compact JSON array for prompt injection.
    pub fn to_prompt_data(&self) -> Result<String, ViewchatError> {
        Ok(serde_json::to_string(&self.rows)?)
    }
}

/// Runs one validated statement against the analytical store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError>;
}

#[async_trait]
impl<T> QueryExecutor for std::sync::Arc<T>
where
    T: QueryExecutor + ?Sized,
{
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError> {
        (**self).execute(sql).await
    }
}

/// Runs [`ReadOnlyGuard`] before delegating, independent of whatever
/// produced the statement.
pub struct GuardedExecutor<E> {
    guard: ReadOnlyGuard,
    inner: E,
}

impl<E> GuardedExecutor<E> {
    pub fn new(guard: ReadOnlyGuard, inner: E) -> Self {
        Self { guard, inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E> QueryExecutor for GuardedExecutor<E>
where
    E: QueryExecutor,
{
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError> {
        if let Err(err) = self.guard.check(sql) {
            tracing::warn!(view = %self.guard.view(), error = %err, "statement rejected before execution");
            return Err(err);
        }
        self.inner.execute(sql).await
    }
}

pub(crate) fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
