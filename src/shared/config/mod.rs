//! Application configuration module
//!
//! Provides the configuration types for the sync subsystem, a builder that
//! layers defaults, a TOML file and environment overrides, and validation.

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default interval of the periodic sync check
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Default delay before the first sync after startup
pub const DEFAULT_INITIAL_SYNC_DELAY: Duration = Duration::from_secs(2);
/// Default timeout of a single remote request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Default interval of the connectivity probe
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Environment variable naming the backend URL
pub const ENV_SERVER_URL: &str = "SUPABASE_URL";
/// Environment variable holding the anonymous API key
pub const ENV_API_KEY: &str = "SUPABASE_ANON_KEY";
/// Environment variable holding a user access token
pub const ENV_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";
/// Environment variable selecting the store backend
pub const ENV_STORE: &str = "STOCKPIT_STORE";
/// Environment variable with the store location
pub const ENV_STORE_PATH: &str = "STOCKPIT_STORE_PATH";
/// Environment variable with the periodic sync interval in seconds
pub const ENV_SYNC_INTERVAL: &str = "STOCKPIT_SYNC_INTERVAL_SECS";
/// Environment variable with the connectivity probe URL
pub const ENV_PROBE_URL: &str = "STOCKPIT_PROBE_URL";

/// Which durable store implementation to compose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// SQLite database file
    #[default]
    Sqlite,
    /// Directory of JSON records
    KeyValue,
    /// In-process only, lost on exit
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "key_value" | "kv" => Ok(StoreBackend::KeyValue),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "store",
                value: other.to_string(),
            }),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Backend base URL
    pub server_url: Option<String>,
    /// Anonymous API key sent as `apikey`
    pub api_key: Option<String>,
    /// Bearer token of the signed-in user
    pub access_token: Option<String>,
    /// Durable store implementation
    pub store_backend: StoreBackend,
    /// Store file or directory; a platform default is used when unset
    pub store_path: Option<PathBuf>,
    /// Periodic sync check interval
    pub sync_interval: Duration,
    /// Delay before the first sync after startup
    pub initial_sync_delay: Duration,
    /// Timeout of one remote request
    pub request_timeout: Duration,
    /// URL polled to detect connectivity; the backend URL when unset
    pub probe_url: Option<String>,
    /// Connectivity probe interval
    pub probe_interval: Duration,
    /// Stamp a client id into insert payloads lacking one
    pub assign_insert_ids: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            access_token: None,
            store_backend: StoreBackend::default(),
            store_path: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            initial_sync_delay: DEFAULT_INITIAL_SYNC_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_url: None,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            assign_insert_ids: true,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in [&self.server_url, &self.probe_url].into_iter().flatten() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "sync_interval_secs",
                value: "0".to_string(),
            });
        }
        if self.probe_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "probe_interval_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// On-disk TOML representation. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Backend base URL
    pub server_url: Option<String>,
    /// Anonymous API key
    pub api_key: Option<String>,
    /// Bearer token
    pub access_token: Option<String>,
    /// Store backend name
    pub store: Option<StoreBackend>,
    /// Store location
    pub store_path: Option<PathBuf>,
    /// Periodic sync interval in seconds
    pub sync_interval_secs: Option<u64>,
    /// Initial sync delay in milliseconds
    pub initial_sync_delay_ms: Option<u64>,
    /// Request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// Connectivity probe URL
    pub probe_url: Option<String>,
    /// Connectivity probe interval in seconds
    pub probe_interval_secs: Option<u64>,
    /// Stamp client ids into insert payloads
    pub assign_insert_ids: Option<bool>,
}

impl FileConfig {
    /// Parse a TOML document
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = Some(url.into());
        self
    }

    /// Set the anonymous API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the bearer token
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    /// Select the store backend
    pub fn store_backend(mut self, backend: StoreBackend) -> Self {
        self.config.store_backend = backend;
        self
    }

    /// Set the store location
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// Set the periodic sync interval
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    /// Set the delay before the first sync
    pub fn initial_sync_delay(mut self, delay: Duration) -> Self {
        self.config.initial_sync_delay = delay;
        self
    }

    /// Set the remote request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the connectivity probe URL
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.config.probe_url = Some(url.into());
        self
    }

    /// Set the connectivity probe interval
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    /// Toggle client id assignment for inserts
    pub fn assign_insert_ids(mut self, enabled: bool) -> Self {
        self.config.assign_insert_ids = enabled;
        self
    }

    /// Overlay values present in a parsed config file
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        let config = &mut self.config;
        if file.server_url.is_some() {
            config.server_url = file.server_url;
        }
        if file.api_key.is_some() {
            config.api_key = file.api_key;
        }
        if file.access_token.is_some() {
            config.access_token = file.access_token;
        }
        if let Some(store) = file.store {
            config.store_backend = store;
        }
        if file.store_path.is_some() {
            config.store_path = file.store_path;
        }
        if let Some(secs) = file.sync_interval_secs {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = file.initial_sync_delay_ms {
            config.initial_sync_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if file.probe_url.is_some() {
            config.probe_url = file.probe_url;
        }
        if let Some(secs) = file.probe_interval_secs {
            config.probe_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = file.assign_insert_ids {
            config.assign_insert_ids = enabled;
        }
        self
    }

    /// Overlay environment values, read through `lookup`
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(ENV_SERVER_URL) {
            self.config.server_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.config.api_key = Some(key);
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.config.access_token = Some(token);
        }
        if let Some(store) = non_empty(ENV_STORE) {
            self.config.store_backend = store.parse()?;
        }
        if let Some(path) = non_empty(ENV_STORE_PATH) {
            self.config.store_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = non_empty(ENV_SYNC_INTERVAL) {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_SYNC_INTERVAL,
                    value: secs.clone(),
                })?;
            self.config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(url) = non_empty(ENV_PROBE_URL) {
            self.config.probe_url = Some(url);
        }
        Ok(self)
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid config file: {0}")]
    Parse(String),
    #[error("cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },
}
