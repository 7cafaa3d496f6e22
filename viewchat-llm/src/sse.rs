use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{
    future,
    stream::{self, BoxStream, StreamExt},
};
use reqwest::{header::HeaderMap, StatusCode};
use viewchat_core::{StreamEvent, ViewchatError};

use crate::openai_compatible::{ChatCompletionChunk, OpenAiError};

/// Payload of a `data:` line, if the line is one.
pub fn parse_sse_line(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("data:").map(str::trim_start)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Maps a non-success provider response onto the error taxonomy.
pub(crate) fn error_from_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ViewchatError {
    let detail = serde_json::from_str::<OpenAiError>(body).ok().map(|e| e.error);

    if let Some(detail) = &detail {
        if detail.is_quota_exhausted() {
            return ViewchatError::LlmProvider(detail.message.clone());
        }
    }

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || detail.as_ref().map(|d| d.is_rate_limit()).unwrap_or(false);
    if throttled {
        return ViewchatError::RateLimited {
            retry_after: retry_after(headers),
        };
    }

    match detail {
        Some(detail) => ViewchatError::LlmProvider(detail.message),
        None => ViewchatError::LlmProvider(format!("HTTP {}: {}", status, body)),
    }
}

fn error_from_stream_payload(data: &str) -> Option<ViewchatError> {
    let detail = serde_json::from_str::<OpenAiError>(data).ok()?.error;
    if detail.is_rate_limit() && !detail.is_quota_exhausted() {
        Some(ViewchatError::RateLimited { retry_after: None })
    } else {
        Some(ViewchatError::LlmProvider(detail.message))
    }
}

pub(crate) fn parse_stream_response(
    response: reqwest::Response,
) -> BoxStream<'static, Result<StreamEvent, ViewchatError>> {
    let stream = response.bytes_stream();
    let mut buffer = BytesMut::new();
    let mut accumulated_text = String::new();
    let terminated = Arc::new(AtomicBool::new(false));
    let terminated_for_take = terminated.clone();

    stream
        .take_while(move |_| future::ready(!terminated_for_take.load(Ordering::SeqCst)))
        .flat_map(move |chunk| match chunk {
            Ok(bytes) => {
                buffer.extend_from_slice(&bytes);
                let mut events = Vec::new();

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line = buffer.split_to(pos + 1);
                    let line_str = String::from_utf8_lossy(&line);
                    let Some(data) = parse_sse_line(&line_str) else {
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }

                    if data == "[DONE]" {
                        events.push(Ok(StreamEvent::FinalAnswer(accumulated_text.clone())));
                        terminated.store(true, Ordering::SeqCst);
                        break;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => {
                            for choice in chunk.choices {
                                if let Some(text) = choice.delta.content {
                                    if !text.is_empty() {
                                        accumulated_text.push_str(&text);
                                        events.push(Ok(StreamEvent::ContentChunk(text)));
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            terminated.store(true, Ordering::SeqCst);
                            let error = error_from_stream_payload(data).unwrap_or_else(|| {
                                ViewchatError::ParseFailed {
                                    output: data.to_string(),
                                    reason: err.to_string(),
                                }
                            });
                            events.push(Err(error));
                            break;
                        }
                    }
                }

                stream::iter(events)
            }
            Err(err) => {
                terminated.store(true, Ordering::SeqCst);
                stream::iter(vec![Err(ViewchatError::Streaming(err.to_string()))])
            }
        })
        .boxed()
}
