use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;
use viewchat_core::{is_retryable, RetryState, StreamFrame, ViewchatError};
use viewchat_memory::{ConversationTurn, Memory};
use viewchat_sql::QueryExecutor;

use crate::config::MemoryPolicy;
use crate::streamer::ResponseStreamer;
use crate::translator::QueryTranslator;

/// Reply carried by the terminal frame once every attempt was throttled.
pub const EXHAUSTED_APOLOGY: &str =
    "Sorry, the assistant is receiving too many requests right now. Please try again in a moment.";

const RATE_LIMIT_STATUS: u16 = 429;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Attempting,
    RateLimited,
    Succeeded,
    Failed,
    Exhausted,
}

impl CoordinatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoordinatorState::Succeeded | CoordinatorState::Failed | CoordinatorState::Exhausted
        )
    }
}

/// One question as seen by the coordinator.
#[derive(Clone, Debug)]
pub struct Question {
    pub session: String,
    pub text: String,
    pub identity: Option<String>,
}

/// How a question ended.
#[derive(Debug)]
pub struct RunReport {
    pub state: CoordinatorState,
    /// Attempts started, including the one that ended the run.
    pub attempts: usize,
    pub error: Option<ViewchatError>,
}

enum AttemptOutcome {
    Completed,
    RateLimited(ViewchatError),
    Failed(ViewchatError, StreamFrame),
}

/// Drives translate → execute → summarize for one question with bounded
/// retry on provider throttling.
///
/// Frames are forwarded as soon as they are produced. When a throttled
/// attempt had already forwarded `Data`, a `Restart` frame precedes the next
/// attempt.
pub struct RetryCoordinator {
    translator: Arc<QueryTranslator>,
    executor: Arc<dyn QueryExecutor>,
    streamer: Arc<ResponseStreamer>,
    memory: Arc<dyn Memory>,
    max_attempts: usize,
    backoff: Duration,
    policy: MemoryPolicy,
}

impl RetryCoordinator {
    pub fn new(
        translator: Arc<QueryTranslator>,
        executor: Arc<dyn QueryExecutor>,
        streamer: Arc<ResponseStreamer>,
        memory: Arc<dyn Memory>,
    ) -> Self {
        Self {
            translator,
            executor,
            streamer,
            memory,
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            policy: MemoryPolicy::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs the question to a terminal state, sending every frame to
    /// `frames`.
    ///
    /// Returns `Cancelled` as soon as the receiver is gone, even while a
    /// backoff, a model call or a statement is in flight. The session's
    /// memory is put back to what it was before the question.
    pub async fn run(
        &self,
        question: &Question,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<RunReport, ViewchatError> {
        let span = tracing::info_span!(
            "viewchat_pipeline",
            session = %question.session,
            max_attempts = self.max_attempts,
        );
        self.run_inner(question, frames).instrument(span).await
    }

    async fn run_inner(
        &self,
        question: &Question,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<RunReport, ViewchatError> {
        let session = question.session.as_str();
        emit(frames, StreamFrame::Start).await?;

        let baseline = match self.memory.snapshot(session).await {
            Ok(turns) => turns,
            Err(err) => {
                tracing::error!(error = %err, "could not read conversation memory");
                emit(frames, StreamFrame::from_error(&err)).await?;
                return Ok(RunReport {
                    state: CoordinatorState::Failed,
                    attempts: 0,
                    error: Some(err),
                });
            }
        };

        match self.drive(question, &baseline, frames).await {
            Err(ViewchatError::Cancelled) => {
                tracing::info!("caller went away, abandoning question");
                if let Err(err) = self.memory.restore(session, baseline).await {
                    tracing::error!(error = %err, "could not restore conversation memory");
                }
                Err(ViewchatError::Cancelled)
            }
            outcome => outcome,
        }
    }

    async fn drive(
        &self,
        question: &Question,
        baseline: &[ConversationTurn],
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<RunReport, ViewchatError> {
        let session = question.session.as_str();
        let mut retry = RetryState::new(self.max_attempts, self.backoff);
        let mut state = CoordinatorState::Attempting;
        let mut forwarded_data = false;
        let mut failure: Option<(ViewchatError, StreamFrame)> = None;

        loop {
            tracing::debug!(?state, attempt = retry.attempt() + 1, "coordinator state");
            match state {
                CoordinatorState::Attempting => {
                    match self
                        .attempt(question, baseline, frames, &mut forwarded_data)
                        .await?
                    {
                        AttemptOutcome::Completed => state = CoordinatorState::Succeeded,
                        AttemptOutcome::RateLimited(err) => {
                            tracing::warn!(
                                error = %err,
                                attempt = retry.attempt() + 1,
                                "provider rate limited the attempt"
                            );
                            state = CoordinatorState::RateLimited;
                        }
                        AttemptOutcome::Failed(err, frame) => {
                            failure = Some((err, frame));
                            state = CoordinatorState::Failed;
                        }
                    }
                }
                CoordinatorState::RateLimited => {
                    if !retry.record_rate_limit() {
                        state = CoordinatorState::Exhausted;
                        continue;
                    }
                    until_closed(frames, tokio::time::sleep(retry.backoff())).await?;

                    if let Err(err) = self.memory.restore(session, baseline.to_vec()).await {
                        let frame = StreamFrame::from_error(&err);
                        failure = Some((err, frame));
                        state = CoordinatorState::Failed;
                        continue;
                    }
                    if forwarded_data {
                        emit(
                            frames,
                            StreamFrame::Restart {
                                attempt: retry.attempt() + 1,
                            },
                        )
                        .await?;
                        forwarded_data = false;
                    }
                    state = CoordinatorState::Attempting;
                }
                CoordinatorState::Succeeded => {
                    emit(frames, StreamFrame::End).await?;
                    return Ok(RunReport {
                        state,
                        attempts: retry.attempt() + 1,
                        error: None,
                    });
                }
                CoordinatorState::Failed => {
                    let (err, frame) = failure.take().unwrap_or_else(|| {
                        let err = ViewchatError::Streaming("attempt failed".to_string());
                        let frame = StreamFrame::from_error(&err);
                        (err, frame)
                    });
                    tracing::error!(error = %err, kind = err.kind(), "question failed");
                    self.apply_failure_policy(session, baseline).await;
                    emit(frames, frame).await?;
                    return Ok(RunReport {
                        state,
                        attempts: retry.attempt() + 1,
                        error: Some(err),
                    });
                }
                CoordinatorState::Exhausted => {
                    let err = ViewchatError::MaxRetriesExceeded {
                        max: retry.max_attempts(),
                    };
                    tracing::error!(error = %err, "retries exhausted, clearing conversation");
                    if let Err(clear_err) = self.memory.clear(session).await {
                        tracing::error!(error = %clear_err, "could not clear conversation memory");
                    }
                    emit(
                        frames,
                        StreamFrame::error(EXHAUSTED_APOLOGY, err.status_code()),
                    )
                    .await?;
                    return Ok(RunReport {
                        state,
                        attempts: retry.attempt(),
                        error: Some(err),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        question: &Question,
        history: &[ConversationTurn],
        frames: &mpsc::Sender<StreamFrame>,
        forwarded_data: &mut bool,
    ) -> Result<AttemptOutcome, ViewchatError> {
        let translation = self.translator.translate(
            &question.session,
            &question.text,
            question.identity.as_deref(),
            history,
        );
        let query = match until_closed(frames, translation).await? {
            Ok(query) => query,
            Err(err) => return Ok(classify(err)),
        };

        let result = match until_closed(frames, self.executor.execute(&query)).await? {
            Ok(result) => result,
            Err(err) => return Ok(classify(err)),
        };

        let mut summary = self
            .streamer
            .summarize_stream(&question.text, &result, history);
        while let Some(frame) = until_closed(frames, summary.next()).await? {
            match frame {
                StreamFrame::Start | StreamFrame::Restart { .. } => {}
                StreamFrame::Data { .. } => {
                    emit(frames, frame).await?;
                    *forwarded_data = true;
                }
                StreamFrame::End => return Ok(AttemptOutcome::Completed),
                StreamFrame::Error { code, message } if code == RATE_LIMIT_STATUS => {
                    return Ok(AttemptOutcome::RateLimited(ViewchatError::Streaming(message)));
                }
                StreamFrame::Error { ref message, .. } => {
                    let err = ViewchatError::Streaming(message.clone());
                    return Ok(AttemptOutcome::Failed(err, frame));
                }
            }
        }

        let err = ViewchatError::Streaming("summary ended without a terminal frame".to_string());
        let frame = StreamFrame::from_error(&err);
        Ok(AttemptOutcome::Failed(err, frame))
    }

    async fn apply_failure_policy(&self, session: &str, baseline: &[ConversationTurn]) {
        let outcome = match self.policy {
            MemoryPolicy::ClearOnFailure => self.memory.clear(session).await,
            MemoryPolicy::PreserveOnFailure => {
                self.memory.restore(session, baseline.to_vec()).await
            }
        };
        if let Err(err) = outcome {
            tracing::error!(error = %err, policy = ?self.policy, "could not apply memory policy");
        }
    }
}

fn classify(err: ViewchatError) -> AttemptOutcome {
    if is_retryable(&err) {
        AttemptOutcome::RateLimited(err)
    } else {
        let frame = StreamFrame::from_error(&err);
        AttemptOutcome::Failed(err, frame)
    }
}

/// Races `work` against the caller hanging up; the losing future is dropped,
/// which releases whatever connection or stream it held.
async fn until_closed<F>(
    frames: &mpsc::Sender<StreamFrame>,
    work: F,
) -> Result<F::Output, ViewchatError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = frames.closed() => Err(ViewchatError::Cancelled),
        output = work => Ok(output),
    }
}

async fn emit(frames: &mpsc::Sender<StreamFrame>, frame: StreamFrame) -> Result<(), ViewchatError> {
    frames
        .send(frame)
        .await
        .map_err(|_| ViewchatError::Cancelled)
}
