use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::Instrument;
use viewchat_core::{Value, ViewchatError};

use crate::executor::json_f64;
use crate::{QueryExecutor, QueryResult, Row, SqlStoreError};

const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor backed by a MySQL pool, the production analytical store.
#[derive(Debug, Clone)]
pub struct MySqlQueryExecutor {
    pool: MySqlPool,
    statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MySqlQueryExecutorBuilder {
    database_url: String,
    max_connections: u32,
    statement_timeout: Duration,
}

impl MySqlQueryExecutor {
    pub fn builder(database_url: impl Into<String>) -> MySqlQueryExecutorBuilder {
        MySqlQueryExecutorBuilder {
            database_url: database_url.into(),
            max_connections: 5,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl MySqlQueryExecutorBuilder {
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub async fn build(self) -> Result<MySqlQueryExecutor, SqlStoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(SqlStoreError::Connection)?;

        Ok(MySqlQueryExecutor {
            pool,
            statement_timeout: self.statement_timeout,
        })
    }
}

#[async_trait]
impl QueryExecutor for MySqlQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError> {
        let span = tracing::info_span!("viewchat_execute", backend = "mysql");
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
            .map_err(execution)?;

            let result = decode_rows(&rows)?;
            tracing::debug!(rows = result.len(), "statement executed");
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

fn decode_rows(rows: &[MySqlRow]) -> Result<QueryResult, ViewchatError> {
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

fn decode_cell(row: &MySqlRow, idx: usize) -> Result<Value, ViewchatError> {
    let raw = row.try_get_raw(idx).map_err(execution)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(idx).map_err(execution)?),
        name if name.ends_with("UNSIGNED") && is_integer(name) => {
            Value::from(row.try_get_unchecked::<u64, _>(idx).map_err(execution)?)
        }
        name if is_integer(name) => {
            Value::from(row.try_get_unchecked::<i64, _>(idx).map_err(execution)?)
        }
        "FLOAT" => json_f64(f64::from(
            row.try_get_unchecked::<f32, _>(idx).map_err(execution)?,
        )),
        "DOUBLE" => json_f64(row.try_get_unchecked::<f64, _>(idx).map_err(execution)?),
        "DATETIME" | "TIMESTAMP" => {
            let at = row.try_get_unchecked::<NaiveDateTime, _>(idx).map_err(execution)?;
            Value::String(at.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        "DATE" => {
            let day = row.try_get_unchecked::<NaiveDate, _>(idx).map_err(execution)?;
            Value::String(day.format("%Y-%m-%d").to_string())
        }
        "TIME" => {
            let time = row.try_get_unchecked::<NaiveTime, _>(idx).map_err(execution)?;
            Value::String(time.format("%H:%M:%S").to_string())
        }
        "BLOB" | "BINARY" | "VARBINARY" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx).map_err(execution)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        // DECIMAL and JSON keep their textual form.
        _ => Value::String(row.try_get_unchecked::<String, _>(idx).map_err(execution)?),
    };
    Ok(value)
}

fn is_integer(name: &str) -> bool {
    ["TINYINT", "SMALLINT", "MEDIUMINT", "INT", "BIGINT", "YEAR"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

fn execution(err: sqlx::Error) -> ViewchatError {
    ViewchatError::Execution(err.to_string())
}
