pub mod envelope;
pub mod sse;
