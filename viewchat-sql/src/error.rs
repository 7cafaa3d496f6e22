use thiserror::Error;
use viewchat_core::ViewchatError;

#[derive(Debug, Error)]
pub enum SqlStoreError {
    #[error("failed to connect to the analytical store: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

impl From<SqlStoreError> for ViewchatError {
    fn from(err: SqlStoreError) -> Self {
        match err {
            SqlStoreError::Connection(_) => ViewchatError::Execution(err.to_string()),
            SqlStoreError::InvalidSchema(_) => ViewchatError::InvalidConfig(err.to_string()),
        }
    }
}
