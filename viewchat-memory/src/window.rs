use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use viewchat_core::ViewchatError;

use crate::{ConversationTurn, Memory};

/// Sliding window holding at most `capacity` turns.
#[derive(Clone, Debug)]
pub struct ConversationWindow {
    capacity: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the evicted turn, if any.
    pub fn push(&mut self, turn: ConversationTurn) -> Option<ConversationTurn> {
        self.turns.push_back(turn);
        if self.turns.len() > self.capacity {
            self.turns.pop_front()
        } else {
            None
        }
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn replace(&mut self, turns: Vec<ConversationTurn>) {
        let skip = turns.len().saturating_sub(self.capacity);
        self.turns = turns.into_iter().skip(skip).collect();
    }
}

/// In-process [`Memory`] keeping one [`ConversationWindow`] per session.
pub struct WindowMemory {
    window_size: usize,
    sessions: Mutex<HashMap<String, ConversationWindow>>,
}

impl WindowMemory {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of sessions currently holding at least one turn.
    pub fn active_sessions(&self) -> Result<usize, ViewchatError> {
        let sessions = self.lock()?;
        Ok(sessions.values().filter(|w| !w.is_empty()).count())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ConversationWindow>>, ViewchatError> {
        self.sessions
            .lock()
            .map_err(|_| ViewchatError::Memory("memory lock poisoned".to_string()))
    }
}

#[async_trait]
impl Memory for WindowMemory {
    async fn append(&self, session: &str, turn: ConversationTurn) -> Result<(), ViewchatError> {
        let mut sessions = self.lock()?;
        let window = sessions
            .entry(session.to_string())
            .or_insert_with(|| ConversationWindow::new(self.window_size));
        if let Some(evicted) = window.push(turn) {
            tracing::debug!(
                session = %session,
                evicted_question = %evicted.question,
                "conversation window full, evicted oldest turn"
            );
        }
        Ok(())
    }

    async fn snapshot(&self, session: &str) -> Result<Vec<ConversationTurn>, ViewchatError> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session)
            .map(ConversationWindow::turns)
            .unwrap_or_default())
    }

    async fn clear(&self, session: &str) -> Result<(), ViewchatError> {
        let mut sessions = self.lock()?;
        sessions.remove(session);
        Ok(())
    }

    async fn restore(
        &self,
        session: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), ViewchatError> {
        let mut sessions = self.lock()?;
        if turns.is_empty() {
            sessions.remove(session);
            return Ok(());
        }
        sessions
            .entry(session.to_string())
            .or_insert_with(|| ConversationWindow::new(self.window_size))
            .replace(turns);
        Ok(())
    }
}
