use futures::{Stream, StreamExt};
use serde_json::json;
use viewchat_core::StreamFrame;

fn format_sse(event_type: &str, payload: serde_json::Value) -> String {
    format!("event: {event_type}\ndata: {payload}\n\n")
}

pub fn to_sse_event(frame: &StreamFrame) -> String {
    match frame {
        StreamFrame::Start => format_sse("start", json!({})),
        StreamFrame::Data { text } => format_sse("data", json!({ "text": text })),
        StreamFrame::Restart { attempt } => format_sse("restart", json!({ "attempt": attempt })),
        StreamFrame::End => format_sse("end", json!({})),
        StreamFrame::Error { message, code } => format_sse(
            "error",
            json!({
                "message": message,
                "code": code,
            }),
        ),
    }
}

pub fn to_sse_stream<S>(frames: S) -> impl Stream<Item = String>
where
    S: Stream<Item = StreamFrame>,
{
    frames.map(|frame| to_sse_event(&frame))
}

pub fn ping_event() -> String {
    format_sse("ping", json!({}))
}
