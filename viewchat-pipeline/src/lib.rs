//! Conversational question answering over a single analytical view.
//!
//! [`ViewChat`] ties the pieces together: a question is translated into one
//! read-only query, checked, executed, and the rows are summarised back as a
//! stream of [`StreamFrame`]s, with bounded retry on provider throttling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;
use viewchat_core::{Llm, StreamFrame, ViewchatError};
use viewchat_memory::{ConversationTurn, Memory, WindowMemory};
use viewchat_sql::{GuardedExecutor, QueryExecutor, ReadOnlyGuard, SchemaContext};

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod streamer;
pub mod translator;

pub use config::{MemoryPolicy, PipelineConfig, Sentinels};
pub use coordinator::{CoordinatorState, Question, RetryCoordinator, RunReport, EXHAUSTED_APOLOGY};
pub use error::BuildError;
pub use streamer::{ResponseStreamer, NO_DATA_MARKER};
pub use translator::{extract_query, QueryTranslator};

/// Upstream request: the question and an already-resolved identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    pub identity: Option<String>,
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ViewchatError> {
        if self.message.trim().is_empty() {
            return Err(ViewchatError::Protocol("message must not be empty".to_string()));
        }
        if matches!(&self.identity, Some(identity) if identity.trim().is_empty()) {
            return Err(ViewchatError::Protocol(
                "identity must be omitted or non-empty".to_string(),
            ));
        }
        if matches!(&self.session_id, Some(session) if session.trim().is_empty()) {
            return Err(ViewchatError::Protocol(
                "session_id must be omitted or non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Memory key for this request: the explicit session id, else the
    /// identity, else a fresh per-request key. Each source has its own
    /// prefix so a chosen session id never lands on someone's identity.
    pub fn session_key(&self) -> String {
        if let Some(session) = &self.session_id {
            format!("session:{session}")
        } else if let Some(identity) = &self.identity {
            format!("identity:{identity}")
        } else {
            format!("anonymous:{}", Uuid::new_v4())
        }
    }

    /// Neither a session id nor an identity: the key is single-use and is
    /// forgotten once the question ends.
    pub fn is_anonymous(&self) -> bool {
        self.session_id.is_none() && self.identity.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatAnswer {
    pub answer: String,
    /// Memory key the question ran under, as accepted by
    /// [`ViewChat::history`] and [`ViewChat::reset`].
    pub session_id: String,
    pub attempts: usize,
}

#[derive(Clone)]
pub struct ViewChat {
    coordinator: Arc<RetryCoordinator>,
    memory: Arc<dyn Memory>,
    config: PipelineConfig,
}

pub struct ViewChatBuilder {
    llm: Option<Arc<dyn Llm>>,
    executor: Option<Arc<dyn QueryExecutor>>,
    schema: Option<SchemaContext>,
    memory: Option<Arc<dyn Memory>>,
    config: PipelineConfig,
}

impl ViewChat {
    pub fn builder() -> ViewChatBuilder {
        ViewChatBuilder {
            llm: None,
            executor: None,
            schema: None,
            memory: None,
            config: PipelineConfig::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn event_buffer_size(&self) -> usize {
        self.config.event_buffer_size
    }

    /// Turns recorded under a memory key (see [`ChatRequest::session_key`]).
    pub async fn history(&self, session: &str) -> Result<Vec<ConversationTurn>, ViewchatError> {
        self.memory.snapshot(session).await
    }

    pub async fn reset(&self, session: &str) -> Result<(), ViewchatError> {
        self.memory.clear(session).await
    }

    /// Streams the answer to one question.
    ///
    /// Malformed requests fail here with `Protocol` before anything runs.
    /// Dropping the returned stream stops the pipeline promptly, even in the
    /// middle of a backoff, a model call or a statement.
    pub async fn query_stream(
        &self,
        request: ChatRequest,
    ) -> Result<ReceiverStream<StreamFrame>, ViewchatError> {
        request.validate()?;
        let anonymous = request.is_anonymous();
        let question = Question {
            session: request.session_key(),
            text: request.message,
            identity: request.identity,
        };

        let (tx, rx) = mpsc::channel::<StreamFrame>(self.config.event_buffer_size);
        let coordinator = self.coordinator.clone();
        let memory = self.memory.clone();

        tokio::spawn(async move {
            match coordinator.run(&question, &tx).await {
                Ok(report) => {
                    tracing::debug!(state = ?report.state, attempts = report.attempts, "question finished")
                }
                Err(ViewchatError::Cancelled) => {
                    tracing::debug!(session = %question.session, "caller went away, stopping")
                }
                Err(err) => tracing::error!(error = %err, "pipeline aborted"),
            }
            if anonymous {
                forget(memory.as_ref(), &question.session).await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Runs one question to completion and returns the final answer text.
    ///
    /// Text forwarded before a restart is discarded.
    pub async fn query(&self, request: ChatRequest) -> Result<ChatAnswer, ViewchatError> {
        request.validate()?;
        let anonymous = request.is_anonymous();
        let session_id = request.session_key();
        let question = Question {
            session: session_id.clone(),
            text: request.message,
            identity: request.identity,
        };

        let (tx, mut rx) = mpsc::channel::<StreamFrame>(self.config.event_buffer_size);
        let coordinator = self.coordinator.clone();
        let run = async move {
            let report = coordinator.run(&question, &tx).await;
            drop(tx);
            report
        };
        let collect = async move {
            let mut answer = String::new();
            while let Some(frame) = rx.recv().await {
                match frame {
                    StreamFrame::Data { text } => answer.push_str(&text),
                    StreamFrame::Restart { .. } => answer.clear(),
                    _ => {}
                }
            }
            answer
        };

        let (report, answer) = tokio::join!(run, collect);
        if anonymous {
            forget(self.memory.as_ref(), &session_id).await;
        }
        let report = report?;
        match report.error {
            Some(err) => Err(err),
            None => Ok(ChatAnswer {
                answer,
                session_id,
                attempts: report.attempts,
            }),
        }
    }
}

async fn forget(memory: &dyn Memory, session: &str) {
    if let Err(err) = memory.clear(session).await {
        tracing::warn!(error = %err, session = %session, "could not drop single-use session");
    }
}

impl ViewChatBuilder {
    pub fn with_llm<T>(mut self, llm: T) -> Self
    where
        T: Llm + 'static,
    {
        self.llm = Some(Arc::new(llm));
        self
    }

    pub fn with_shared_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: QueryExecutor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn with_schema(mut self, schema: SchemaContext) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_memory<M>(mut self, memory: M) -> Self
    where
        M: Memory + 'static,
    {
        self.memory = Some(Arc::new(memory));
        self
    }

    pub fn with_shared_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_buffer_size(mut self, event_buffer_size: usize) -> Self {
        if event_buffer_size > 0 {
            self.config.event_buffer_size = event_buffer_size;
        }
        self
    }

    pub fn build(self) -> Result<ViewChat, BuildError> {
        self.config.validate()?;
        let llm = self.llm.ok_or(BuildError::MissingLlm)?;
        let executor = self.executor.ok_or(BuildError::MissingExecutor)?;
        let schema = self
            .schema
            .ok_or(BuildError::MissingSchema)?
            .with_unsupported_marker(self.config.unsupported_marker.clone());
        let schema = Arc::new(schema);
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(WindowMemory::new(self.config.memory_window)));

        let guarded: Arc<dyn QueryExecutor> = Arc::new(GuardedExecutor::new(
            ReadOnlyGuard::new(schema.view()),
            executor,
        ));
        let translator = QueryTranslator::new(llm.clone(), schema, memory.clone())
            .with_model(self.config.model.clone())
            .with_temperature(self.config.translation_temperature);
        let streamer = ResponseStreamer::new(llm)
            .with_model(self.config.model.clone())
            .with_temperature(self.config.summary_temperature);
        let coordinator = RetryCoordinator::new(
            Arc::new(translator),
            guarded,
            Arc::new(streamer),
            memory.clone(),
        )
        .with_max_attempts(self.config.max_attempts)
        .with_backoff(self.config.backoff)
        .with_memory_policy(self.config.memory_policy);

        Ok(ViewChat {
            coordinator: Arc::new(coordinator),
            memory,
            config: self.config,
        })
    }
}
