use thiserror::Error;
use viewchat_core::ViewchatError;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no language model configured; call with_llm")]
    MissingLlm,
    #[error("no query executor configured; call with_executor")]
    MissingExecutor,
    #[error("no schema configured; call with_schema")]
    MissingSchema,
    #[error(transparent)]
    Config(#[from] ViewchatError),
}

impl From<BuildError> for ViewchatError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Config(inner) => inner,
            other => ViewchatError::InvalidConfig(other.to_string()),
        }
    }
}
