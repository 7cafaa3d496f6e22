use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::Instrument;
use viewchat_core::{Value, ViewchatError};

use crate::executor::json_f64;
use crate::{QueryExecutor, QueryResult, Row, SqlStoreError};

const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor backed by a SQLite pool. Used for local development and tests;
/// the view is an ordinary table or view in the database file.
///
/// Connections are opened read-only unless the builder says otherwise.
#[derive(Debug, Clone)]
pub struct SqliteQueryExecutor {
    pool: SqlitePool,
    statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SqliteQueryExecutorBuilder {
    database_url: String,
    max_connections: u32,
    statement_timeout: Duration,
    read_only: bool,
}

impl SqliteQueryExecutor {
    pub fn builder(database_url: impl Into<String>) -> SqliteQueryExecutorBuilder {
        SqliteQueryExecutorBuilder {
            database_url: database_url.into(),
            max_connections: 1,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            read_only: true,
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SqliteQueryExecutorBuilder {
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Writable connections are only useful for seeding fixtures.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub async fn build(self) -> Result<SqliteQueryExecutor, SqlStoreError> {
        let options = SqliteConnectOptions::from_str(&self.database_url)
            .map_err(SqlStoreError::Connection)?
            .read_only(self.read_only);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(SqlStoreError::Connection)?;
        tracing::debug!(read_only = self.read_only, "sqlite pool ready");

        Ok(SqliteQueryExecutor {
            pool,
            statement_timeout: self.statement_timeout,
        })
    }
}

#[async_trait]
impl QueryExecutor for SqliteQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError> {
        let span = tracing::info_span!("viewchat_execute", backend = "sqlite");
        async move {
            let rows = tokio::time::timeout(
                self.statement_timeout,
                sqlx::query(sql).fetch_all(&self.pool),
            )
            .await
            .map_err(|_| {
                ViewchatError::Execution(format!(
                    "statement timed out after {}ms",
                    self.statement_timeout.as_millis()
                ))
            })?
            .map_err(|err| ViewchatError::Execution(err.to_string()))?;

            let result = decode_rows(&rows)?;
            tracing::debug!(rows = result.len(), "statement executed");
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

fn decode_rows(rows: &[SqliteRow]) -> Result<QueryResult, ViewchatError> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out = Row::new();
        for (idx, column) in row.columns().iter().enumerate() {
            out.insert(column.name().to_string(), decode_cell(row, idx)?);
        }
        decoded.push(out);
    }
    Ok(QueryResult::new(columns, decoded))
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Result<Value, ViewchatError> {
    let raw = row.try_get_raw(idx).map_err(execution)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(idx).map_err(execution)?),
        "REAL" | "NUMERIC" => json_f64(row.try_get_unchecked::<f64, _>(idx).map_err(execution)?),
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(idx).map_err(execution)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx).map_err(execution)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(idx).map_err(execution)?),
    };
    Ok(value)
}

fn execution(err: sqlx::Error) -> ViewchatError {
    ViewchatError::Execution(err.to_string())
}
