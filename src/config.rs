//! Configuration loading for the sync daemon and embedding applications.
//!
//! Layers, lowest priority first: built-in defaults, the TOML file named by
//! `$STOCKPIT_CONFIG` (or `<config dir>/stockpit/sync.toml`), then the
//! environment variables listed in [`crate::shared::config`].

use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError, FileConfig};
use crate::sync::SyncConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "STOCKPIT_CONFIG";

/// Application configuration wrapper.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    source: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment and the default file locations
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => {
                Self::load_from(Some(Path::new(&path)), true, |key| std::env::var(key).ok())
            }
            _ => Self::load_from(Self::default_path().as_deref(), false, |key| {
                std::env::var(key).ok()
            }),
        }
    }

    /// Load with an explicit file and environment lookup.
    ///
    /// A missing file is an error only when `required` is set.
    pub fn load_from<F>(path: Option<&Path>, required: bool, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = AppConfigBuilder::default();
        let mut source = None;

        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    builder = builder.merge_file(FileConfig::parse(&text)?);
                    source = Some(path.to_path_buf());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                    tracing::debug!("No config file at {}", path.display());
                }
                Err(e) => {
                    return Err(ConfigError::Read {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        let app = builder.merge_env(lookup)?.build()?;
        Ok(Self { app, source })
    }

    /// `<config dir>/stockpit/sync.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stockpit").join("sync.toml"))
    }

    /// The loaded configuration
    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Settings for the sync manager
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::from(&self.app)
    }
}
