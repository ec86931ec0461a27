//! Configuration for the Chorus runtime.
//!
//! Settings are layered with figment (defaults, files, `CHORUS_*`
//! environment variables, programmatic merges) and checked by
//! [`validate_config`] before use.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ChorusConfig, IngestConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig,
};
pub use validation::validate_config;

pub use chorus_framework::DispatchConfig;
