use serde::{Deserialize, Serialize};
use viewchat_core::Message;

/// One question and what the pipeline resolved it to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub response: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            response: response.into(),
        }
    }
}

/// Renders turns as alternating user/assistant messages, oldest first.
pub fn transcript(turns: &[ConversationTurn]) -> Vec<Message> {
    turns
        .iter()
        .flat_map(|turn| {
            [
                Message::user(turn.question.clone()),
                Message::assistant(turn.response.clone()),
            ]
        })
        .collect()
}
