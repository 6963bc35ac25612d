//! Configuration system for egonet.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/egonet/config.toml`
//! 3. **Environment variables** - `EGONET_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/egonet/egonet.db"
//!
//! [credentials]
//! consumer_key = "..."
//! consumer_secret = "..."
//! access_token = "..."
//! access_token_secret = "..."
//!
//! [retry]
//! max_attempts = 20
//! backoff_secs = 50
//!
//! [throttle]
//! page_delay_ms = 1000
//! graph_member_delay_ms = 20000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EgonetError, Result};

/// Main configuration structure for egonet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub credentials: Credentials,
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub search: SearchConfig,
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `EGONET_DB`
    pub db: Option<PathBuf>,
}

/// User-context keys for the remote API.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

// Keys never show up in debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("Credentials")
            .field("consumer_key", &mask(&self.consumer_key))
            .field("consumer_secret", &mask(&self.consumer_secret))
            .field("access_token", &mask(&self.access_token))
            .field("access_token_secret", &mask(&self.access_token_secret))
            .finish()
    }
}

impl Credentials {
    /// Name of the first empty key, if any.
    #[must_use]
    pub fn first_missing(&self) -> Option<&'static str> {
        [
            ("consumer_key", &self.consumer_key),
            ("consumer_secret", &self.consumer_secret),
            ("access_token", &self.access_token),
            ("access_token_secret", &self.access_token_secret),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    /// Ensure every key is present.
    ///
    /// # Errors
    ///
    /// Returns [`EgonetError::MissingCredentials`] naming the first empty key.
    pub fn validate(&self) -> Result<()> {
        match self.first_missing() {
            Some(missing) => Err(EgonetError::MissingCredentials {
                missing: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API.
    pub base_url: String,
    /// Base URL of the streaming API.
    pub stream_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Retry discipline for remote calls and store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per sub-operation before it is abandoned.
    pub max_attempts: u32,
    /// Fixed wait after a transient failure, in seconds.
    pub backoff_secs: u64,
    /// Extra attempts for a single record save after a transient store error.
    pub store_retries: u32,
}

/// Courtesy delays between remote page fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Delay after each ID/list page.
    pub page_delay_ms: u64,
    /// Delay after each search or timeline page.
    pub search_page_delay_ms: u64,
    /// Delay before expanding each member in the full-graph pass.
    pub graph_member_delay_ms: u64,
}

/// Tweet search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Cap on statuses collected per query batch.
    pub max_tweets: u64,
    /// How many days back a search window reaches by default.
    pub window_days: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            stream_url: "https://stream.twitter.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff_secs: 50,
            store_retries: 1,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: 1_000,
            search_page_delay_ms: 1_000,
            graph_member_delay_ms: 20_000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_tweets: 10_000_000,
            window_days: 7,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl ThrottleConfig {
    /// No delays at all (tests, replays).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            page_delay_ms: 0,
            search_page_delay_ms: 0,
            graph_member_delay_ms: 0,
        }
    }

    #[must_use]
    pub const fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    #[must_use]
    pub const fn search_page_delay(&self) -> Duration {
        Duration::from_millis(self.search_page_delay_ms)
    }

    #[must_use]
    pub const fn graph_member_delay(&self) -> Duration {
        Duration::from_millis(self.graph_member_delay_ms)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/egonet/config.toml)
    /// 3. Compiled defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the user config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = match Self::user_config_path() {
            Some(path) => Self::load_from_file(&path)?.unwrap_or_default(),
            None => Self::default(),
        };

        config.apply_env_overrides();

        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        match toml::from_str(&content) {
            Ok(config) => {
                info!("Loaded config from: {}", path.display());
                Ok(Some(config))
            }
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                Err(EgonetError::Config {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("egonet").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `EGONET_*` overrides from an arbitrary variable source.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(db) = var("EGONET_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        let creds = &mut self.credentials;
        for (key, slot) in [
            ("EGONET_CONSUMER_KEY", &mut creds.consumer_key),
            ("EGONET_CONSUMER_SECRET", &mut creds.consumer_secret),
            ("EGONET_ACCESS_TOKEN", &mut creds.access_token),
            ("EGONET_ACCESS_TOKEN_SECRET", &mut creds.access_token_secret),
        ] {
            if let Some(value) = var(key) {
                *slot = value;
            }
        }

        if let Some(url) = var("EGONET_API_URL") {
            self.api.base_url = url;
        }
        if let Some(n) = var("EGONET_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = n;
        }
        if let Some(n) = var("EGONET_BACKOFF_SECS").and_then(|v| v.parse().ok()) {
            self.retry.backoff_secs = n;
        }
        if let Some(n) = var("EGONET_PAGE_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.throttle.page_delay_ms = n;
            self.throttle.search_page_delay_ms = n;
        }
    }

    /// Get the database path, using defaults if not configured.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Write this configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> std::io::Result<PathBuf> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(config_path)
    }
}
