use serde::{Deserialize, Serialize};

use crate::ViewchatError;

/// Status code carried by every non-error frame on the wire.
pub const STATUS_OK: u16 = 200;

/// One unit of a streamed answer.
///
/// A stream is always `Start`, then any number of `Data` and `Restart`
/// frames, then exactly one of `End` or `Error`. Nothing follows the
/// terminal frame. `Start`, `Restart` and `End` are framing only and carry
/// no user-visible text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamFrame {
    Start,
    Data { text: String },
    /// Data already forwarded for the previous attempt is void; a new
    /// attempt follows.
    Restart { attempt: usize },
    End,
    Error { message: String, code: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Start,
    Data,
    Restart,
    End,
    Error,
}

impl StreamFrame {
    pub fn data(text: impl Into<String>) -> Self {
        StreamFrame::Data { text: text.into() }
    }

    pub fn error(message: impl Into<String>, code: u16) -> Self {
        StreamFrame::Error {
            message: message.into(),
            code,
        }
    }

    pub fn from_error(error: &ViewchatError) -> Self {
        StreamFrame::error(error.to_string(), error.status_code())
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            StreamFrame::Start => FrameKind::Start,
            StreamFrame::Data { .. } => FrameKind::Data,
            StreamFrame::Restart { .. } => FrameKind::Restart,
            StreamFrame::End => FrameKind::End,
            StreamFrame::Error { .. } => FrameKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::End | StreamFrame::Error { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            StreamFrame::Error { code, .. } => *code,
            _ => STATUS_OK,
        }
    }

    /// User-visible text, if this frame carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamFrame::Data { text } => Some(text.as_str()),
            StreamFrame::Error { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}
