//! Chat-completion clients for the translation and summarization calls.

mod client;
pub mod openai_compatible;
mod sse;

pub use client::{OpenAiCompatibleBuilder, OpenAiCompatibleClient};
pub use sse::parse_sse_line;
pub use viewchat_core::{Llm, LlmRequest, LlmResponse, Message, Role};
