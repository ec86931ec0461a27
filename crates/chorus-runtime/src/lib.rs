//! Chorus Runtime - ingestion, configuration and logging for the Chorus
//! command routing core.
//!
//! This crate provides:
//! - The ingestion loop (`ChorusRuntime`) pulling from a `MessageSource`
//! - A channel-backed source for tests and local tools (`ChannelSource`)
//! - Layered configuration with figment (`ConfigLoader`, `ChorusConfig`)
//! - Logging setup on tracing-subscriber (`LoggingBuilder`)
//!
//! ```ignore
//! use chorus_runtime::{ChannelSource, ChorusRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, source) = ChannelSource::channel(64);
//!     let runtime = ChorusRuntime::builder().build(build_registry()?, source)?;
//!
//!     // Feed `tx` from your backend, then run until Ctrl+C.
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod source;

pub use config::{ChorusConfig, ConfigError, ConfigLoader, ConfigResult, IngestConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{ChorusRuntime, RuntimeBuilder, RuntimeStats};
pub use source::{ChannelSource, MessageSender, MessageSource, SourceError};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
