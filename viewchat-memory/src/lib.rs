use async_trait::async_trait;
use viewchat_core::ViewchatError;

pub mod turn;
pub mod window;

pub use turn::{transcript, ConversationTurn};
pub use window::{ConversationWindow, WindowMemory};

/// Bounded conversational history partitioned by session key.
///
/// Every operation is scoped to one session; sessions never observe each
/// other's turns.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append a turn, evicting the oldest once the window is full.
    async fn append(&self, session: &str, turn: ConversationTurn) -> Result<(), ViewchatError>;

    /// Turns for the session, oldest first.
    async fn snapshot(&self, session: &str) -> Result<Vec<ConversationTurn>, ViewchatError>;

    /// Forget everything recorded for the session.
    async fn clear(&self, session: &str) -> Result<(), ViewchatError>;

    /// Replace the session's turns with a previously taken snapshot.
    async fn restore(
        &self,
        session: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), ViewchatError>;
}
