use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewchatError {
    #[error("Translation failed on output '{output}': {reason}")]
    Translation { output: String, reason: String },
    #[error("Query execution failed: {0}")]
    Execution(String),
    #[error("Query rejected as unsafe: {reason}")]
    UnsafeQuery { query: String, reason: String },
    #[error("{}", rate_limited_message(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("Streaming failed: {0}")]
    Streaming(String),
    #[error("Malformed request: {0}")]
    Protocol(String),
    #[error("LLM provider failed: {0}")]
    LlmProvider(String),
    #[error("Parsing failed on output '{output}': {reason}")]
    ParseFailed { output: String, reason: String },
    #[error("Max retries ({max}) exceeded")]
    MaxRetriesExceeded { max: usize },
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Conversation memory failed: {0}")]
    Memory(String),
    #[error("Serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn rate_limited_message(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(duration) => format!("LLM provider rate limited (retry_after={duration:?})"),
        None => "LLM provider rate limited (retry_after=unknown)".to_string(),
    }
}

impl ViewchatError {
    /// Status code carried on the terminal error frame for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ViewchatError::Protocol(_) => 400,
            ViewchatError::Translation { .. } | ViewchatError::UnsafeQuery { .. } => 422,
            ViewchatError::RateLimited { .. } | ViewchatError::MaxRetriesExceeded { .. } => 429,
            ViewchatError::Cancelled => 499,
            ViewchatError::LlmProvider(_) | ViewchatError::ParseFailed { .. } => 502,
            ViewchatError::Execution(_)
            | ViewchatError::Streaming(_)
            | ViewchatError::InvalidConfig(_)
            | ViewchatError::Memory(_)
            | ViewchatError::Serde(_) => 500,
        }
    }

    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            ViewchatError::Translation { .. } => "translation",
            ViewchatError::Execution(_) => "execution",
            ViewchatError::UnsafeQuery { .. } => "unsafe_query",
            ViewchatError::RateLimited { .. } => "rate_limited",
            ViewchatError::Streaming(_) => "streaming",
            ViewchatError::Protocol(_) => "protocol",
            ViewchatError::LlmProvider(_) => "llm_provider",
            ViewchatError::ParseFailed { .. } => "parse_failed",
            ViewchatError::MaxRetriesExceeded { .. } => "retries_exhausted",
            ViewchatError::Cancelled => "cancelled",
            ViewchatError::InvalidConfig(_) => "invalid_config",
            ViewchatError::Memory(_) => "memory",
            ViewchatError::Serde(_) => "serde",
        }
    }
}
