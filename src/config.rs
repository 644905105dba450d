//! Configuration management for session-sync.
//!
//! Configuration is resolved with the following priority (highest to lowest):
//! 1. Values supplied by the host application
//! 2. Environment variables
//! 3. Bundled configuration file (JSON)
//!
//! There is no hardcoded fallback for the provider endpoint. If no layer
//! supplies it, [`Config::provider_endpoint`] fails and the synchronizer
//! refuses to start.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable overriding the provider URL.
pub const ENV_PROVIDER_URL: &str = "SESSION_SYNC_PROVIDER_URL";
/// Environment variable overriding the provider anon key.
pub const ENV_PROVIDER_KEY: &str = "SESSION_SYNC_PROVIDER_KEY";
/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "SESSION_SYNC_LOG_LEVEL";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity provider endpoint.
    pub provider: ProviderSection,
    /// Synchronizer behavior.
    pub sync: SyncSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Identity provider section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Base URL of the identity provider project.
    pub url: Option<String>,
    /// Public (anon) API key for the project.
    pub anon_key: Option<String>,
}

/// Synchronizer section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Upper bound on the remote sign-out call before local sign-out proceeds.
    pub sign_out_timeout_ms: u64,
    /// Run a validation round trip when the synchronizer starts.
    pub validate_on_start: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            sign_out_timeout_ms: 5_000,
            validate_on_start: true,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A validated identity provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// Base URL, without trailing slash.
    pub url: String,
    /// Public (anon) API key.
    pub anon_key: String,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_PROVIDER_URL).filter(|v| !v.is_empty()) {
            self.provider.url = Some(url);
        }

        if let Some(key) = lookup(ENV_PROVIDER_KEY).filter(|v| !v.is_empty()) {
            self.provider.anon_key = Some(key);
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply values supplied by the host application.
    ///
    /// Only fields that are set override; unset fields keep lower layers.
    pub fn apply_overrides(&mut self, overrides: &ProviderSection) {
        if let Some(ref url) = overrides.url {
            self.provider.url = Some(url.clone());
        }
        if let Some(ref key) = overrides.anon_key {
            self.provider.anon_key = Some(key.clone());
        }
    }

    /// Resolve configuration with the full priority chain.
    ///
    /// Priority: host overrides > env vars > bundled file.
    pub fn resolve(
        overrides: Option<&ProviderSection>,
        bundled: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = match bundled {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();

        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }

        config.provider_endpoint()?;
        Ok(config)
    }

    /// Validate and return the identity provider endpoint.
    pub fn provider_endpoint(&self) -> Result<ProviderEndpoint, ConfigError> {
        let url = self
            .provider
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingField("provider.url"))?;

        let anon_key = self
            .provider
            .anon_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingField("provider.anon_key"))?;

        if is_placeholder(url) {
            return Err(ConfigError::Placeholder("provider.url"));
        }
        if is_placeholder(anon_key) {
            return Err(ConfigError::Placeholder("provider.anon_key"));
        }

        validate_url(url)?;

        Ok(ProviderEndpoint {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    /// Timeout applied to the remote half of sign-out.
    pub fn sign_out_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.sign_out_timeout_ms)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn is_placeholder(value: &str) -> bool {
    value.starts_with("YOUR_")
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("{raw} ({e})")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!("{raw} (unsupported scheme)")));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!("{raw} (missing host)")));
    }

    Ok(())
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A required field was not supplied by any layer.
    MissingField(&'static str),
    /// A field still holds an unfilled template value.
    Placeholder(&'static str),
    /// Provider URL is not an absolute http(s) URL.
    InvalidUrl(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::MissingField(field) => write!(f, "missing required setting: {}", field),
            Self::Placeholder(field) => {
                write!(f, "setting {} still holds a placeholder value", field)
            }
            Self::InvalidUrl(url) => write!(f, "invalid provider url: {}", url),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}
