//! The ingestion loop.
//!
//! [`ChorusRuntime`] pulls batches from a [`MessageSource`] and hands every
//! message to the [`Dispatcher`] on its own tokio task. The loop never waits
//! for a batch to finish before fetching the next one, so a handler that
//! blocks on a slow backend only holds up its own conversation. Messages of
//! different conversations have no ordering guarantee.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chorus_runtime::{ChannelSource, ChorusRuntime};
//!
//! let (tx, source) = ChannelSource::channel(64);
//! let runtime = ChorusRuntime::builder()
//!     .config_file("chorus.toml")
//!     .build(registry, source)?;
//!
//! // Run until Ctrl+C; in-flight messages finish before this returns.
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChorusConfig, ConfigLoader, IngestConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::source::{MessageSource, SourceError};
use chorus_core::{CompletionSignal, Message};
use chorus_framework::{CommandRegistry, Dispatcher};

/// Longest message preview written to debug logs, in characters.
const PREVIEW_CHARS: usize = 120;

/// Counters describing what the runtime has processed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Messages taken from the source.
    pub received: u64,
    /// Messages whose handling ended with `Completed`.
    pub completed: u64,
    /// Messages that left a dialog pending.
    pub continued: u64,
    /// Messages that were canceled, unrecognized or failed.
    pub canceled: u64,
}

#[derive(Default)]
struct StatsCounters {
    received: AtomicU64,
    completed: AtomicU64,
    continued: AtomicU64,
    canceled: AtomicU64,
}

impl StatsCounters {
    fn record(&self, signal: CompletionSignal) {
        let counter = match signal {
            CompletionSignal::Completed => &self.completed,
            CompletionSignal::ToBeContinued => &self.continued,
            CompletionSignal::Canceled => &self.canceled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            continued: self.continued.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
        }
    }
}

/// Pulls messages from a source and dispatches them concurrently.
pub struct ChorusRuntime {
    dispatcher: Dispatcher,
    source: Arc<dyn MessageSource>,
    ingest: IngestConfig,
    shutdown: CancellationToken,
    running: AtomicBool,
    stats: Arc<StatsCounters>,
}

impl ChorusRuntime {
    /// Creates a runtime with default ingestion settings.
    pub fn new(dispatcher: Dispatcher, source: impl MessageSource + 'static) -> Self {
        Self {
            dispatcher,
            source: Arc::new(source),
            ingest: IngestConfig::default(),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            stats: Arc::default(),
        }
    }

    /// Creates a runtime builder that loads configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from already loaded configuration.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(
        config: &ChorusConfig,
        registry: CommandRegistry,
        source: impl MessageSource + 'static,
    ) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            commands = registry.len(),
            log_level = %config.logging.level,
            poll_interval_ms = config.ingest.poll_interval_ms,
            "Runtime initialized from configuration"
        );

        let dispatcher = Dispatcher::with_config(registry, config.dispatch.clone());
        Self::new(dispatcher, source).with_ingest(config.ingest.clone())
    }

    /// Replaces the ingestion settings.
    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns a token that stops the loop when cancelled.
    ///
    /// Cancelling it stops the current run and every later one.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.snapshot()
    }

    /// Runs until Ctrl+C, the shutdown token, or the source closing.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Runs until `signal` resolves, the shutdown token is cancelled, or the
    /// source closes. Waits for in-flight messages before returning.
    ///
    /// `signal` only stops this run; the runtime can be started again
    /// afterwards.
    pub async fn run_until<F>(&self, signal: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        let token = self.shutdown.child_token();
        let watcher = tokio::spawn({
            let token = token.clone();
            async move {
                signal.await;
                token.cancel();
            }
        });

        info!(
            poll_interval_ms = self.ingest.poll_interval_ms,
            max_in_flight = ?self.ingest.max_in_flight,
            "Chorus runtime started"
        );

        let limiter = self.ingest.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        loop {
            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                fetched = self.source.fetch() => fetched,
            };

            match fetched {
                Ok(batch) if batch.is_empty() => {
                    self.dispatcher.dialogs().purge_expired();
                    if self.idle(&token).await {
                        break;
                    }
                }
                Ok(batch) => {
                    debug!(size = batch.len(), "Fetched batch");
                    for message in batch {
                        let Some(permit) = self.acquire(&limiter, &token).await else {
                            break;
                        };
                        self.spawn(&mut tasks, message, permit);
                    }
                }
                Err(SourceError::Closed) => {
                    info!("Message source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to fetch messages, retrying");
                    if self.idle(&token).await {
                        break;
                    }
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        watcher.abort();
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        self.running.store(false, Ordering::SeqCst);
        info!(stats = ?self.stats(), "Chorus runtime stopped");
        Ok(())
    }

    /// Sleeps for the poll interval. Returns `true` if shutdown was requested.
    async fn idle(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(self.ingest.poll_interval()) => false,
        }
    }

    /// Waits for an in-flight slot. `Some(None)` means no cap is configured;
    /// `None` means shutdown was requested while waiting.
    async fn acquire(
        &self,
        limiter: &Option<Arc<Semaphore>>,
        token: &CancellationToken,
    ) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(limiter) = limiter else {
            return Some(None);
        };
        tokio::select! {
            _ = token.cancelled() => None,
            permit = Arc::clone(limiter).acquire_owned() => permit.ok().map(Some),
        }
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<()>,
        message: Message,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        debug!(message = %preview(&message), "Received message");

        let dispatcher = self.dispatcher.clone();
        let stats = Arc::clone(&self.stats);
        tasks.spawn(async move {
            let _permit = permit;
            let signal = dispatcher.handle(message).await;
            stats.record(signal);
        });
    }
}

impl std::fmt::Debug for ChorusRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChorusRuntime")
            .field("dispatcher", &self.dispatcher)
            .field("ingest", &self.ingest)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Message task failed");
    }
}

/// Renders a message as JSON, cut to [`PREVIEW_CHARS`] characters.
fn preview(message: &Message) -> String {
    let json = serde_json::to_string(message).unwrap_or_else(|e| format!("<{e}>"));
    match json.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &json[..cut]),
        None => json,
    }
}

/// Builds a [`ChorusRuntime`] from configuration files.
pub struct RuntimeBuilder {
    loader: ConfigLoader,
    config: Option<ChorusConfig>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new(),
            config: None,
        }
    }

    /// Loads this file instead of searching the default locations.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    /// Uses `config` as is, skipping file and environment loading.
    pub fn config(mut self, config: ChorusConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads configuration and creates the runtime.
    pub fn build(
        self,
        registry: CommandRegistry,
        source: impl MessageSource + 'static,
    ) -> RuntimeResult<ChorusRuntime> {
        let config = match self.config {
            Some(config) => {
                crate::config::validate_config(&config)?;
                config
            }
            None => self.loader.load()?,
        };
        Ok(ChorusRuntime::from_config(&config, registry, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelSource;
    use chorus_core::{MessageType, RecordingReply};
    use chorus_framework::{CommandContext, Trigger};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn ingest(max_in_flight: Option<usize>) -> IngestConfig {
        IngestConfig {
            poll_interval_ms: 10,
            max_in_flight,
        }
    }

    fn friend(recorder: &Arc<RecordingReply>, sender: i64, text: &str) -> Message {
        Message::new(MessageType::FRIEND, text)
            .sender(sender)
            .reply_with(recorder.clone())
    }

    fn registry(gate: Arc<Notify>) -> CommandRegistry {
        let mut builder = CommandRegistry::builder();
        builder
            .command("slow", Trigger::new(["slow"]), move |_ctx: CommandContext| {
                let gate = Arc::clone(&gate);
                async move { gate.notified().await }
            })
            .unwrap();
        builder
            .command("ping", Trigger::new(["ping"]), |_ctx: CommandContext| async {
                "pong".to_string()
            })
            .unwrap();
        builder.build()
    }

    async fn wait_for_replies(recorder: &RecordingReply, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.sent().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("replies did not arrive in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_handler_does_not_stall_batch() {
        let gate = Arc::new(Notify::new());
        let (tx, source) = ChannelSource::channel(16);
        let runtime = Arc::new(
            ChorusRuntime::new(Dispatcher::new(registry(Arc::clone(&gate))), source)
                .with_ingest(ingest(None)),
        );

        let recorder = RecordingReply::new();
        tx.send(friend(&recorder, 1, "slow")).await.unwrap();
        for sender in 2..5 {
            tx.send(friend(&recorder, sender, "ping")).await.unwrap();
        }

        let handle = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move { runtime.run_until(std::future::pending()).await }
        });

        wait_for_replies(&recorder, 3).await;
        assert!(recorder.texts().iter().all(|t| t == "pong"));

        gate.notify_one();
        runtime.shutdown();
        handle.await.unwrap().unwrap();

        let stats = runtime.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.completed, 4);
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_stops_when_source_closes() {
        let (tx, source) = ChannelSource::channel(16);
        let runtime = ChorusRuntime::new(
            Dispatcher::new(registry(Arc::new(Notify::new()))),
            source,
        )
        .with_ingest(ingest(Some(1)));

        let recorder = RecordingReply::new();
        tx.send(friend(&recorder, 1, "ping")).await.unwrap();
        tx.send(friend(&recorder, 2, "dance")).await.unwrap();
        drop(tx);

        runtime.run_until(std::future::pending()).await.unwrap();

        let stats = runtime.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.canceled, 1);
        assert_eq!(recorder.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_signal_stops_loop() {
        let (_tx, source) = ChannelSource::channel(1);
        let runtime = ChorusRuntime::new(
            Dispatcher::new(CommandRegistry::builder().build()),
            source,
        )
        .with_ingest(ingest(None));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.run_until(tokio::time::sleep(Duration::from_millis(30))),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_runs_again_after_signal() {
        let (tx, source) = ChannelSource::channel(4);
        let runtime = ChorusRuntime::new(
            Dispatcher::new(registry(Arc::new(Notify::new()))),
            source,
        )
        .with_ingest(ingest(None));

        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.shutdown_token().is_cancelled());

        let recorder = RecordingReply::new();
        tx.send(friend(&recorder, 1, "ping")).await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.run_until(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(recorder.texts(), vec!["pong".to_string()]);
        assert_eq!(runtime.stats().received, 1);

        // An explicit shutdown sticks.
        runtime.shutdown();
        runtime.run_until(std::future::pending()).await.unwrap();
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_preview_is_truncated() {
        let long = "x".repeat(500);
        let message = Message::new(MessageType::GROUP, long).group(1).sender(2);
        let text = preview(&message);
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), PREVIEW_CHARS + 3);

        let short = preview(&Message::new(MessageType::FRIEND, "ping"));
        assert!(short.contains("\"command\":\"ping\""));
        assert!(short.contains("\"type\":[\"friend\"]"));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = ChorusConfig::default();
        config.ingest.poll_interval_ms = 0;
        let (_tx, source) = ChannelSource::channel(1);

        let result = ChorusRuntime::builder()
            .config(config)
            .build(CommandRegistry::builder().build(), source);
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
