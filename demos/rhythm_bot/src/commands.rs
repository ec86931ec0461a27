//! Command handlers.

use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use chorus::prelude::*;
use chorus::RegistryError;
use chorus::framework::RegistryBuilder;
use parking_lot::Mutex;
use tracing::info;

use crate::charts::{self, Chart};

/// Help text, filled in once the registry is built.
pub static HELP: OnceLock<String> = OnceLock::new();

/// Card bindings per sender.
static BINDINGS: LazyLock<Mutex<HashMap<i64, Binding>>> = LazyLock::new(Default::default);

/// Chart ids already downloaded.
static CACHE: LazyLock<Mutex<HashSet<u32>>> = LazyLock::new(Default::default);

/// One lock per chart id, so concurrent requests for the same chart download
/// it once.
static DOWNLOADS: LazyLock<KeyedLocks<u32>> = LazyLock::new(KeyedLocks::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Server {
    Aqua,
    Rin,
}

impl Server {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "1" | "aqua" => Some(Self::Aqua),
            "2" | "rin" => Some(Self::Rin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    server: Server,
    card: String,
}

/// Declares every command.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    let summary = builder.register(
        CommandSpec::new("summary", Trigger::new(["summary", "sum"]), summary)
            .doc("recent play summary"),
    )?;
    builder.register(
        CommandSpec::new("base", Trigger::new(["base", "b"]), summary_base)
            .parent(summary)
            .doc("charts by level, e.g. `sum b 10-11`"),
    )?;
    builder.register(
        CommandSpec::new("genre", Trigger::new(["genre"]), summary_genre)
            .parent(summary)
            .doc("charts by genre"),
    )?;

    builder.register(
        CommandSpec::new("bind", Trigger::new(["bind", "绑定"]), bind)
            .doc("bind a game card (private chat only)"),
    )?;
    builder.register(
        CommandSpec::new("preview", Trigger::new(["preview", "pv"]), preview)
            .doc("search a song and preview one of its charts"),
    )?;
    builder.register(
        CommandSpec::new("download", Trigger::new(["download", "dl"]), download)
            .doc("fetch a chart by id"),
    )?;
    builder.register(
        CommandSpec::new("help", Trigger::new(["help"]).strict(true), help).doc("this list"),
    )?;
    Ok(())
}

fn list(title: &str, charts: &[&Chart]) -> String {
    if charts.is_empty() {
        return format!("{title}: nothing found");
    }
    let lines: Vec<String> = charts.iter().map(|c| format!("  {c}")).collect();
    format!("{title}:\n{}", lines.join("\n"))
}

// ============================================================================
// summary
// ============================================================================

async fn summary(ctx: CommandContext) -> String {
    let Some(sender) = ctx.message().sender_id() else {
        return "I cannot tell who you are.".to_string();
    };
    let binding = BINDINGS.lock().get(&sender).cloned();
    match binding {
        Some(b) => format!(
            "Summary for card {} on {:?}: {} charts played. Try `sum base 10-11`.",
            b.card,
            b.server,
            charts::CHARTS.len()
        ),
        None => "No card bound yet. Send `bind` in a private chat first.".to_string(),
    }
}

async fn summary_base(ctx: CommandContext) -> Result<String, HandlerError> {
    let (min, max) = charts::parse_level_range(ctx.args()).ok_or_else(|| {
        HandlerError::invalid_arguments(format!("'{}' is not a level or range", ctx.args()))
    })?;
    Ok(list(
        &format!("Charts Lv.{min:.1}-{max:.1}"),
        &charts::by_level(min, max),
    ))
}

async fn summary_genre(ctx: CommandContext) -> String {
    let genre = ctx.args();
    list(&format!("Genre {genre}"), &charts::by_genre(genre))
}

// ============================================================================
// bind: three turns carried by an explicit state value
// ============================================================================

#[derive(Debug)]
enum BindStep {
    AskServer,
    AskCard { server: Server },
    Confirm { server: Server, card: String },
}

async fn bind(ctx: CommandContext) -> Result<CompletionSignal, HandlerError> {
    if ctx.message().group_id().is_some() {
        ctx.reply("Please bind in a private chat.").await?;
        return Ok(CompletionSignal::Canceled);
    }
    ctx.reply("Which server? 1. Aqua  2. Rin").await?;
    ctx.converse(BindStep::AskServer, bind_step);
    Ok(CompletionSignal::ToBeContinued)
}

async fn bind_step(step: BindStep, next: CommandContext) -> Result<Turn<BindStep>, HandlerError> {
    match step {
        BindStep::AskServer => match Server::parse(next.args()) {
            Some(server) => {
                next.reply("Send your 20-digit access code.").await?;
                Ok(Turn::Continue(BindStep::AskCard { server }))
            }
            None => {
                next.reply("Unknown server, bind canceled.").await?;
                Ok(Turn::cancel())
            }
        },
        BindStep::AskCard { server } => {
            let card = next.args().replace(' ', "");
            if card.len() != 20 || !card.chars().all(|c| c.is_ascii_digit()) {
                next.reply("That does not look like an access code, try again.")
                    .await?;
                return Ok(Turn::Continue(BindStep::AskCard { server }));
            }
            next.reply(format!("Bind {card} on {server:?}? (y/n)")).await?;
            Ok(Turn::Continue(BindStep::Confirm { server, card }))
        }
        BindStep::Confirm { server, card } => {
            if !next.args().eq_ignore_ascii_case("y") {
                next.reply("Bind canceled.").await?;
                return Ok(Turn::cancel());
            }
            let sender = next.message().sender_id().unwrap_or_default();
            info!(sender, ?server, "Card bound");
            BINDINGS.lock().insert(sender, Binding { server, card });
            next.reply("Bound!").await?;
            Ok(Turn::done())
        }
    }
}

// ============================================================================
// preview: one follow-up turn, canceled on a bad choice
// ============================================================================

async fn preview(ctx: CommandContext) -> Result<CompletionSignal, HandlerError> {
    let found = charts::search(ctx.args());
    match found.as_slice() {
        [] => {
            ctx.reply(format!("No song matches '{}'.", ctx.args())).await?;
            Ok(CompletionSignal::Completed)
        }
        [chart] => {
            ctx.reply(render_preview(chart)).await?;
            Ok(CompletionSignal::Completed)
        }
        many => {
            let options: Vec<String> = many
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{}. {c}", i + 1))
                .collect();
            ctx.reply(format!("Which one?\n{}", options.join("\n"))).await?;

            let choices: Vec<Chart> = many.iter().map(|c| **c).collect();
            ctx.add_dialog(move |next: CommandContext| pick_preview(choices, next));
            Ok(CompletionSignal::ToBeContinued)
        }
    }
}

async fn pick_preview(
    choices: Vec<Chart>,
    next: CommandContext,
) -> Result<CompletionSignal, HandlerError> {
    let picked = next
        .args()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| choices.get(i));
    match picked {
        Some(chart) => {
            next.reply(render_preview(chart)).await?;
            Ok(CompletionSignal::Completed)
        }
        None => {
            next.reply("Not a valid choice, preview canceled.").await?;
            Ok(CompletionSignal::Canceled)
        }
    }
}

fn render_preview(chart: &Chart) -> ReplyContent {
    // The backend renders chart images; the demo sends a placeholder payload.
    ReplyContent::image(format!("cHJldmlldzo{}", chart.id))
}

// ============================================================================
// download: serialized per chart id
// ============================================================================

async fn download(ctx: CommandContext) -> Result<String, HandlerError> {
    let id: u32 = ctx
        .args()
        .parse()
        .map_err(|_| HandlerError::invalid_arguments("usage: download <chart id>"))?;
    let chart = charts::by_id(id)
        .ok_or_else(|| HandlerError::invalid_arguments(format!("no chart #{id}")))?;

    let _guard = DOWNLOADS.acquire(id).await;
    if CACHE.lock().contains(&id) {
        return Ok(format!("{chart} is already cached."));
    }

    info!(chart = id, "Downloading chart");
    tokio::time::sleep(Duration::from_millis(500)).await;
    CACHE.lock().insert(id);
    Ok(format!("Downloaded {chart}."))
}

// ============================================================================
// help
// ============================================================================

async fn help(_ctx: CommandContext) -> String {
    HELP.get().cloned().unwrap_or_default()
}
