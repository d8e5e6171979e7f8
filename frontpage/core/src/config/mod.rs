//! TOML Configuration File Support
//!
//! Centralized settings loading for the page core, from a TOML file at
//! `~/.config/frontpage/frontpage.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. Programmatic overrides ([`ConfigOverrides`])
//! 2. Environment variables (`FRONTPAGE_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [ads]
//! server_url = "https://ads.example.com/serve"
//! batch_window_ms = 0
//! request_timeout_ms = 5000
//!
//! [fragments]
//! poll_interval_secs = 60
//! request_timeout_ms = 10000
//! placeholder_message = "This content is temporarily unavailable."
//!
//! [logging]
//! filter = "frontpage_core=info"
//!
//! [site]
//! config_path = "/etc/frontpage/site.json"
//! ```
//!
//! The site configuration (URL patterns → apps) is a separate JSON document;
//! see [`site`].

pub mod site;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use site::{AppConfig, ModuleSpec, SiteConfig};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse the JSON site configuration
    #[error("Failed to parse site config: {0}")]
    SiteParseError(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from a programmatic override
    Override,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[ads]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsToml {
    /// Ad server endpoint
    pub server_url: Option<String>,

    /// How long registrations are collected before requests go out (0 = same tick)
    pub batch_window_ms: Option<u64>,

    /// Ad server request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// `[fragments]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentsToml {
    /// Default polling interval in seconds
    pub poll_interval_secs: Option<u64>,

    /// Fragment request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Message shown in place of a fragment that failed to load
    pub placeholder_message: Option<String>,
}

/// `[logging]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// `tracing` filter directive
    pub filter: Option<String>,
}

/// `[site]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteToml {
    /// Path of the JSON site configuration
    pub config_path: Option<PathBuf>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontpageToml {
    /// Ad coordination settings
    pub ads: AdsToml,
    /// Fragment polling settings
    pub fragments: FragmentsToml,
    /// Logging settings
    pub logging: LoggingToml,
    /// Site configuration location
    pub site: SiteToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Resolved ad coordination settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdsConfig {
    /// Ad server endpoint (no HTTP ad server without it)
    pub server_url: Option<String>,
    /// Registration batching window
    pub batch_window: Duration,
    /// Ad server request timeout
    pub request_timeout: Duration,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            batch_window: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolved fragment polling settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentsConfig {
    /// Default polling interval
    pub poll_interval: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Placeholder shown when a fetch fails
    pub placeholder_message: String,
}

impl Default for FragmentsConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            placeholder_message: "This content is temporarily unavailable.".to_string(),
        }
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct FrontpageConfig {
    /// Ad coordination settings
    pub ads: AdsConfig,

    /// Fragment polling settings
    pub fragments: FragmentsConfig,

    /// `tracing` filter directive
    pub log_filter: String,

    /// JSON site configuration path
    pub site_config_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for FrontpageConfig {
    fn default() -> Self {
        Self {
            ads: AdsConfig::default(),
            fragments: FragmentsConfig::default(),
            log_filter: "frontpage_core=info".to_string(),
            site_config_path: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl FrontpageConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with a TOML document applied (no environment)
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let toml_config: FrontpageToml = toml::from_str(content)?;
        let mut config = Self::default();
        apply_toml_config(&mut config, &toml_config);
        config.source = ConfigSource::File;
        config.validate()?;
        Ok(config)
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ads.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "ads.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.fragments.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "fragments.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.fragments.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "fragments.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/frontpage/frontpage.toml` or
/// `~/.config/frontpage/frontpage.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("frontpage").join("frontpage.toml"))
}

/// Load configuration from the default path, then the environment
pub fn load_config() -> Result<FrontpageConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from `path` (if it exists), then the environment
///
/// A missing file is not an error; defaults are used instead.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FrontpageConfig, ConfigError> {
    // Start with defaults
    let mut config = FrontpageConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FrontpageToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config);

    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut FrontpageConfig, toml: &FrontpageToml) {
    // Ads
    if let Some(ref url) = toml.ads.server_url {
        config.ads.server_url = Some(url.clone());
    }
    if let Some(ms) = toml.ads.batch_window_ms {
        config.ads.batch_window = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.ads.request_timeout_ms {
        config.ads.request_timeout = Duration::from_millis(ms);
    }

    // Fragments
    if let Some(secs) = toml.fragments.poll_interval_secs {
        config.fragments.poll_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.fragments.request_timeout_ms {
        config.fragments.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ref message) = toml.fragments.placeholder_message {
        config.fragments.placeholder_message = message.clone();
    }

    // Logging
    if let Some(ref filter) = toml.logging.filter {
        config.log_filter = filter.clone();
    }

    // Site
    if let Some(ref path) = toml.site.config_path {
        config.site_config_path = Some(path.clone());
    }
}

fn apply_env_config(config: &mut FrontpageConfig) {
    if let Ok(url) = std::env::var("FRONTPAGE_AD_SERVER_URL") {
        if !url.trim().is_empty() {
            config.ads.server_url = Some(url);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(window) = std::env::var("FRONTPAGE_AD_BATCH_WINDOW_MS") {
        if let Ok(ms) = window.parse::<u64>() {
            config.ads.batch_window = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("FRONTPAGE_AD_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.ads.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(interval) = std::env::var("FRONTPAGE_POLL_INTERVAL_SECS") {
        if let Ok(secs) = interval.parse::<u64>() {
            config.fragments.poll_interval = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("FRONTPAGE_FRAGMENT_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.fragments.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(message) = std::env::var("FRONTPAGE_PLACEHOLDER") {
        config.fragments.placeholder_message = message;
        config.source = ConfigSource::Env;
    }
    if let Ok(path) = std::env::var("FRONTPAGE_SITE_CONFIG") {
        config.site_config_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Ok(filter) = std::env::var("FRONTPAGE_LOG") {
        config.log_filter = filter;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Programmatic Overrides
// =============================================================================

/// Overrides applied on top of file and environment values
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Ad server endpoint override
    pub ad_server_url: Option<String>,

    /// Batch window override in milliseconds
    pub batch_window_ms: Option<u64>,

    /// Poll interval override in seconds
    pub poll_interval_secs: Option<u64>,

    /// Site configuration path override
    pub site_config_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set ad server endpoint override
    #[must_use]
    pub fn with_ad_server_url(mut self, url: impl Into<String>) -> Self {
        self.ad_server_url = Some(url.into());
        self
    }

    /// Set batch window override
    #[must_use]
    pub fn with_batch_window_ms(mut self, ms: u64) -> Self {
        self.batch_window_ms = Some(ms);
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Set site configuration path override
    #[must_use]
    pub fn with_site_config_path(mut self, path: PathBuf) -> Self {
        self.site_config_path = Some(path);
        self
    }

    /// Apply overrides to a configuration and re-validate the result
    ///
    /// On a validation error the configuration keeps the overridden values.
    pub fn apply(&self, config: &mut FrontpageConfig) -> Result<(), ConfigError> {
        if self.ad_server_url.is_some()
            || self.batch_window_ms.is_some()
            || self.poll_interval_secs.is_some()
            || self.site_config_path.is_some()
        {
            config.source = ConfigSource::Override;
        }

        if let Some(ref url) = self.ad_server_url {
            config.ads.server_url = Some(url.clone());
        }
        if let Some(ms) = self.batch_window_ms {
            config.ads.batch_window = Duration::from_millis(ms);
        }
        if let Some(secs) = self.poll_interval_secs {
            config.fragments.poll_interval = Duration::from_secs(secs);
        }
        if let Some(ref path) = self.site_config_path {
            config.site_config_path = Some(path.clone());
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
