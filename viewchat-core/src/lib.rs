mod error;
mod frame;
mod llm;
mod retry;
mod runnable;

pub use error::ViewchatError;
pub use frame::{FrameKind, StreamFrame, STATUS_OK};
pub use llm::{LlmRequest, LlmResponse, Message, Role};
pub use retry::{is_retryable, RetryState};
pub use runnable::{Runnable, StreamEvent};

pub type Value = serde_json::Value;

/// Any single-shot + token-streaming chat model.
pub trait Llm: Runnable<LlmRequest, LlmResponse> + Send + Sync {}

impl<T> Llm for T where T: Runnable<LlmRequest, LlmResponse> + Send + Sync {}
