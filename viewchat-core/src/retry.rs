use std::time::Duration;

use crate::ViewchatError;

/// Only provider throttling is worth another attempt; everything else is
/// either deterministic or already surfaced to the caller.
pub fn is_retryable(error: &ViewchatError) -> bool {
    matches!(error, ViewchatError::RateLimited { .. })
}

/// Bounded retry bookkeeping for one question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    attempt: usize,
    max_attempts: usize,
    backoff: Duration,
}

impl RetryState {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Records a rate-limited attempt. Returns `true` while another attempt
    /// is still allowed.
    pub fn record_rate_limit(&mut self) -> bool {
        self.attempt = (self.attempt + 1).min(self.max_attempts);
        self.attempt < self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
