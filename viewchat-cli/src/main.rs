use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;
use viewchat::llm::OpenAiCompatibleClient;
use viewchat::pipeline::adapters::envelope::{to_envelope, Framing};
use viewchat::pipeline::config::DEFAULT_MODEL;
use viewchat::sql::{MySqlQueryExecutor, SqliteQueryExecutor};
use viewchat::{
    ChatRequest, MemoryPolicy, PipelineConfig, SchemaContext, SchemaDescriptor, StreamFrame,
    ViewChat, ViewChatBuilder,
};

#[derive(Debug, Parser)]
#[command(name = "viewchat", version, about = "Ask questions about the funding view")]
struct Cli {
    /// Provider API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long, env = "VIEWCHAT_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    #[arg(long, env = "VIEWCHAT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// mysql://... or sqlite:...
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Resolved caller identity used for personalised questions
    #[arg(long, env = "VIEWCHAT_IDENTITY")]
    identity: Option<String>,

    /// JSON schema descriptor; defaults to the built-in funding view
    #[arg(long)]
    schema: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    memory_window: usize,

    #[arg(long, default_value_t = 3)]
    max_attempts: usize,

    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    /// Keep earlier turns when a question fails instead of clearing them
    #[arg(long)]
    preserve_memory_on_failure: bool,

    /// Print replies the way sentinel-based clients receive them
    #[arg(long)]
    legacy_sentinels: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig {
        model: cli.model.clone(),
        memory_window: cli.memory_window,
        max_attempts: cli.max_attempts,
        backoff: Duration::from_millis(cli.backoff_ms),
        memory_policy: if cli.preserve_memory_on_failure {
            MemoryPolicy::PreserveOnFailure
        } else {
            MemoryPolicy::ClearOnFailure
        },
        ..PipelineConfig::default()
    };
    let framing = if cli.legacy_sentinels {
        Framing::Legacy(config.sentinels.clone())
    } else {
        Framing::Structured
    };

    let mut llm = OpenAiCompatibleClient::builder()
        .base_url(&cli.base_url)?
        .default_model(cli.model.clone());
    if let Some(key) = &cli.api_key {
        llm = llm.api_key(key.clone());
    }

    let builder = ViewChat::builder()
        .with_llm(llm.build()?)
        .with_schema(load_schema(cli.schema.as_ref())?)
        .with_config(config);
    let chat = with_store(builder, &cli.database_url).await?.build()?;

    // Identified callers keep their identity's history; otherwise the REPL
    // pins one session so follow-up questions see earlier turns.
    let template = ChatRequest {
        message: String::new(),
        identity: cli.identity.clone(),
        session_id: cli
            .identity
            .is_none()
            .then(|| format!("cli:{}", uuid::Uuid::new_v4())),
    };
    tracing::info!(session = %template.session_key(), "viewchat ready");

    repl(&chat, &template, &framing).await
}

fn load_schema(path: Option<&PathBuf>) -> Result<SchemaContext> {
    let descriptor = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading schema {}", path.display()))?;
            SchemaDescriptor::from_json(&raw)?
        }
        None => SchemaDescriptor::funding_view(),
    };
    Ok(SchemaContext::new(descriptor)?)
}

async fn with_store(builder: ViewChatBuilder, database_url: &str) -> Result<ViewChatBuilder> {
    if database_url.starts_with("mysql://") {
        let executor = MySqlQueryExecutor::builder(database_url).build().await?;
        Ok(builder.with_executor(executor))
    } else if database_url.starts_with("sqlite:") {
        let executor = SqliteQueryExecutor::builder(database_url).build().await?;
        Ok(builder.with_executor(executor))
    } else {
        bail!("unsupported DATABASE_URL scheme; expected mysql:// or sqlite:")
    }
}

async fn repl(chat: &ViewChat, template: &ChatRequest, framing: &Framing) -> Result<()> {
    let session = template.session_key();
    let mut editor = DefaultEditor::new()?;
    println!("Ask about the data. /reset clears the conversation, /quit exits.");

    loop {
        let line = match editor.readline("viewchat> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        match line {
            "/quit" | "/exit" => break,
            "/reset" => {
                chat.reset(&session).await?;
                println!("conversation cleared");
            }
            question => {
                let request = ChatRequest {
                    message: question.to_string(),
                    ..template.clone()
                };
                ask(chat, request, framing).await?;
            }
        }
    }
    Ok(())
}

async fn ask(chat: &ViewChat, request: ChatRequest, framing: &Framing) -> Result<()> {
    let mut frames = chat.query_stream(request).await?;
    let mut stdout = std::io::stdout();

    while let Some(frame) = frames.next().await {
        if let Framing::Legacy(_) = framing {
            let envelope = to_envelope(&frame, framing);
            println!("[{}] {}", envelope.status.code, envelope.reply);
            continue;
        }
        match frame {
            StreamFrame::Start => {}
            StreamFrame::Data { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamFrame::Restart { attempt } => {
                writeln!(stdout)?;
                writeln!(stdout, "(provider busy, restarting answer: attempt {attempt})")?;
            }
            StreamFrame::End => writeln!(stdout)?,
            StreamFrame::Error { message, code } => {
                writeln!(stdout)?;
                eprintln!("error {code}: {message}");
            }
        }
    }
    Ok(())
}
