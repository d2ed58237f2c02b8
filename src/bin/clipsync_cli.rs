use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipsync::client::{ClipboardClient, Remote};
use clipsync::model::ClipboardId;
use clipsync::session::{Notice, Session, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipsync-cli")]
#[command(about = "Read, write and follow a shared clipboard")]
struct Cli {
    #[arg(short, long, env = "CLIPSYNC_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[arg(short, long, default_value = "default")]
    id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current content
    Get {
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the content with the argument, or stdin when omitted
    Put { content: Option<String> },
    /// Follow updates from other devices until ctrl+c
    Watch {
        #[arg(long, default_value_t = 2000)]
        poll_ms: u64,
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
        /// Treat each stdin line as a new buffer to push
        #[arg(long)]
        edit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let client = ClipboardClient::new(&cli.server)?;
    let id = ClipboardId::new(Some(&cli.id));

    match cli.command {
        Command::Get { json } => {
            let record = client
                .fetch(&id)
                .await
                .with_context(|| format!("failed to load clipboard '{}' from {}", id, client.base_url()))?;
            if json {
                println!("{}", serde_json::to_string(&record)?);
            } else {
                print!("{}", record.content);
            }
        }
        Command::Put { content } => {
            let content = match content {
                Some(content) => content,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };
            let timestamp = client.save(&id, &content).await.context("failed to save content")?;
            eprintln!("saved {} bytes to '{}' at {}", content.len(), id, timestamp);
        }
        Command::Watch {
            poll_ms,
            debounce_ms,
            edit,
        } => {
            let config = SessionConfig {
                poll_interval: Duration::from_millis(poll_ms),
                debounce: Duration::from_millis(debounce_ms),
            };
            watch(client, id, config, edit).await?;
        }
    }

    Ok(())
}

async fn watch(client: ClipboardClient, id: ClipboardId, config: SessionConfig, edit: bool) -> Result<()> {
    let (session, mut notices) = Session::start(Arc::new(client), id, config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = edit;

    loop {
        tokio::select! {
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                eprintln!("[{}]", notice.message());
                if matches!(notice, Notice::Loaded | Notice::UpdatedRemotely) {
                    println!("{}", session.content());
                }
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => session.edit(line),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    Ok(())
}
