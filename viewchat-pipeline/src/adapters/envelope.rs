//! The `{reply, status}` message shape spoken by the chat RPC.

use serde::{Deserialize, Serialize};
use viewchat_core::{FrameKind, StreamFrame, STATUS_OK};

use crate::config::Sentinels;

/// Reply text of an error envelope; the cause travels in `status.message`.
pub const ERROR_REPLY: &str = "An error occurred while streaming the response.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub reply: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FrameKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// Start and end are literal marker replies that clients strip.
    Legacy(Sentinels),
    /// Frame kind travels beside the reply; framing replies are empty.
    #[default]
    Structured,
}

pub fn to_envelope(frame: &StreamFrame, framing: &Framing) -> ChatEnvelope {
    let (reply, message) = match (frame, framing) {
        (StreamFrame::Error { message, .. }, _) => (ERROR_REPLY.to_string(), message.clone()),
        (StreamFrame::Data { text }, _) => (text.clone(), "Streaming...".to_string()),
        // A repeated start marker tells legacy clients to discard partial text.
        (StreamFrame::Start | StreamFrame::Restart { .. }, Framing::Legacy(sentinels)) => {
            (sentinels.start.clone(), "Streaming...".to_string())
        }
        (StreamFrame::End, Framing::Legacy(sentinels)) => {
            (sentinels.end.clone(), "Completed".to_string())
        }
        (StreamFrame::Start, Framing::Structured) => (String::new(), "Streaming...".to_string()),
        (StreamFrame::Restart { attempt }, Framing::Structured) => {
            (String::new(), format!("Restarting (attempt {attempt})"))
        }
        (StreamFrame::End, Framing::Structured) => (String::new(), "Completed".to_string()),
    };

    ChatEnvelope {
        reply,
        status: Status {
            code: frame.status_code(),
            message,
        },
        kind: match framing {
            Framing::Legacy(_) => None,
            Framing::Structured => Some(frame.kind()),
        },
    }
}

impl ChatEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status.code == STATUS_OK
    }
}
