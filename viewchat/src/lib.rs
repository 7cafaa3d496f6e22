//! Ask questions about one analytical view in plain language and get a
//! streamed answer back.
//!
//! This crate re-exports the workspace crates behind features:
//!
//! - `openai` (default): the OpenAI-compatible chat client
//! - `sqlite` (default): the SQLite executor
//! - `mysql`: the MySQL executor

pub use viewchat_core as core;
pub use viewchat_memory as memory;
pub use viewchat_pipeline as pipeline;
pub use viewchat_prompt as prompt;
pub use viewchat_sql as sql;

#[cfg(feature = "openai")]
pub use viewchat_llm as llm;

pub use viewchat_core::{StreamFrame, ViewchatError};
pub use viewchat_pipeline::{
    ChatAnswer, ChatRequest, MemoryPolicy, PipelineConfig, ViewChat, ViewChatBuilder,
};
pub use viewchat_sql::{SchemaContext, SchemaDescriptor};

pub mod prelude {
    pub use viewchat_core::{Llm, Runnable, StreamFrame, ViewchatError};
    pub use viewchat_memory::{ConversationTurn, Memory, WindowMemory};
    pub use viewchat_pipeline::adapters::envelope::{to_envelope, ChatEnvelope, Framing};
    pub use viewchat_pipeline::{ChatAnswer, ChatRequest, PipelineConfig, ViewChat};
    pub use viewchat_sql::{QueryExecutor, QueryResult, SchemaContext, SchemaDescriptor};

    #[cfg(feature = "openai")]
    pub use viewchat_llm::OpenAiCompatibleClient;
    #[cfg(feature = "mysql")]
    pub use viewchat_sql::MySqlQueryExecutor;
    #[cfg(feature = "sqlite")]
    pub use viewchat_sql::SqliteQueryExecutor;
}
