//! A console rhythm-game bot.
//!
//! Each line read from stdin becomes one inbound message; replies are printed
//! to stdout. Try:
//!
//! ```text
//! sum base 10-11
//! preview glacier
//! 2
//! bind
//! ```

mod charts;
mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chorus::core::ReplyResult;
use chorus::prelude::*;
use chorus::runtime::{ConfigLoader, MessageSender};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "rhythm-bot", about = "Console chart bot built on Chorus")]
struct Args {
    /// Configuration file (TOML or YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pretend every line comes from this group instead of a private chat.
    #[arg(short, long)]
    group: Option<i64>,

    /// Sender id attached to every line.
    #[arg(short, long, default_value_t = 10001)]
    sender: i64,

    /// Overrides the ingest poll interval, in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,
}

/// Prints replies to stdout.
struct StdoutReply;

#[async_trait]
impl Reply for StdoutReply {
    async fn send(&self, content: ReplyContent) -> ReplyResult<()> {
        match content {
            ReplyContent::Text(text) => println!("bot> {text}"),
            ReplyContent::Image { base64 } => println!("bot> [image, {} bytes]", base64.len()),
        }
        Ok(())
    }
}

async fn read_stdin(args: &Args, tx: MessageSender) {
    let reply: Arc<dyn Reply> = Arc::new(StdoutReply);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match args.group {
            Some(group) => Message::new(MessageType::GROUP, line).group(group),
            None => Message::new(MessageType::FRIEND, line),
        }
        .sender(args.sender)
        .reply_with(reply.clone());

        if tx.send(message).await.is_err() {
            break;
        }
    }
    info!("Input closed");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().search_path(".").with_user_config_dir();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(ms) = args.poll_ms {
        config.ingest.poll_interval_ms = ms;
    }

    let mut builder = CommandRegistry::builder();
    commands::register(&mut builder)?;
    let registry = builder.build();
    let _ = commands::HELP.set(registry.help_lines().join("\n"));

    let (tx, source) = ChannelSource::channel(64);
    let runtime = ChorusRuntime::builder()
        .config(config)
        .build(registry, source)?;

    info!(commands = runtime.dispatcher().registry().len(), "Rhythm bot ready");

    // The source reports closed once stdin hits EOF and `tx` is dropped.
    tokio::spawn(async move { read_stdin(&args, tx).await });

    runtime.run().await?;

    let stats = runtime.stats();
    info!(
        received = stats.received,
        completed = stats.completed,
        continued = stats.continued,
        canceled = stats.canceled,
        "Rhythm bot stopped"
    );
    Ok(())
}
