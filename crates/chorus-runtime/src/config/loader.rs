//! Layered configuration loading with figment.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. `ChorusConfig::default()`
//! 2. `chorus.{profile}.toml`, next to the main file when present
//! 3. the main file: `--file` if given, otherwise the first of `chorus.toml`,
//!    `config.toml` (and the `.yaml`/`.yml` variants with `yaml-config`) found
//!    in the search paths
//! 4. `CHORUS_*` environment variables, `__` separating nested keys, e.g.
//!    `CHORUS_INGEST__POLL_INTERVAL_MS=250` or `CHORUS_DISPATCH__EXPOSE_FAULT_DETAIL=true`
//! 5. values passed to [`ConfigLoader::merge`]
//!
//! ```rust,ignore
//! use chorus_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("prod")
//!     .file("./config/chorus.toml")
//!     .load()?;
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ChorusConfig;
use super::validation::validate_config;

/// Environment variable prefix.
const ENV_PREFIX: &str = "CHORUS_";

/// File names tried in every search directory, in order.
const CANDIDATES: &[&str] = &[
    "chorus.toml",
    "config.toml",
    "chorus.yaml",
    "chorus.yml",
    "config.yaml",
    "config.yml",
];

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the `dev` and `prod` short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CHORUS_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("CHORUS_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Overrides the search when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the user config directory (`~/.config/chorus` on Linux).
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("chorus")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges configuration programmatically, above every other source.
    ///
    /// The whole value is merged, so its defaults override file and
    /// environment settings too.
    pub fn merge(mut self, config: ChorusConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<ChorusConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: ChorusConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let defaults = Figment::from(Serialized::defaults(ChorusConfig::default()));

        let mut figment = match self.config_file.take() {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path)),
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                merge_file(defaults, &path)?
            }
            None => self.merge_found_files(defaults)?,
        };

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        let overrides = std::mem::take(&mut self.figment);
        Ok(figment.merge(overrides))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("chorus")))
            .collect()
    }

    /// Merges the first main file found in the search directories, preceded
    /// by its profile variant if one sits next to it.
    fn merge_found_files(&self, figment: Figment) -> ConfigResult<Figment> {
        let dirs = self.search_dirs();
        let found = dirs
            .iter()
            .flat_map(|dir| CANDIDATES.iter().map(move |name| dir.join(name)))
            .filter(|path| format_enabled(path))
            .find(|path| path.exists());

        let Some(main) = found else {
            warn!(paths = ?dirs, "No configuration file found, using defaults");
            return Ok(figment);
        };

        let mut figment = figment;
        if let Some(variant) = self.profile_variant(&main).filter(|p| p.exists()) {
            debug!(path = %variant.display(), "Loading profile-specific config");
            figment = merge_file(figment, &variant)?;
        }
        info!(path = %main.display(), "Loading configuration file");
        merge_file(figment, &main)
    }

    /// `chorus.toml` becomes `chorus.{profile}.toml`.
    fn profile_variant(&self, main: &Path) -> Option<PathBuf> {
        let stem = main.file_stem()?.to_str()?;
        let ext = main.extension()?.to_str()?;
        Some(main.with_file_name(format!("{stem}.{}.{ext}", self.profile)))
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(OsStr::to_str).unwrap_or("")
}

fn format_enabled(path: &Path) -> bool {
    match extension(path) {
        "toml" => cfg!(feature = "toml-config"),
        "yaml" | "yml" => cfg!(feature = "yaml-config"),
        _ => false,
    }
}

/// Merges one file, picking the provider by extension.
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match extension(path) {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<ChorusConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` plus environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<ChorusConfig> {
    ConfigLoader::new().file(path).load()
}
