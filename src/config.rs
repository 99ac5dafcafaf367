//! Config file loading and CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use informer::InformerConfig;
use reconciler::ControllerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::{default_manifest_path, Cli};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] reconciler::Error),
}

/// Everything the binary can be configured with. Every field is optional
/// in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Manifest file listing the `CronTab`s.
    pub manifests: Option<PathBuf>,
    pub controller: ControllerConfig,
    pub informer: InformerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            manifests: None,
            controller: ControllerConfig::default().with_name("crontabs"),
            informer: InformerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse TOML text.
    ///
    /// # Errors
    ///
    /// Fails on invalid TOML or mistyped fields.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read the config file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `cli.config` if given, then apply the other flags on top.
    ///
    /// # Errors
    ///
    /// Fails if the config file cannot be loaded or the result is invalid.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.controller.validate()?;
        Ok(config)
    }

    /// Let flags override file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(manifests) = &cli.manifests {
            self.manifests = Some(manifests.clone());
        }
        if let Some(workers) = cli.workers {
            self.controller.workers = workers;
        }
        if let Some(secs) = cli.resync_secs {
            self.informer = self
                .informer
                .clone()
                .with_resync_period(Duration::from_secs(secs));
        }
    }

    /// Manifest file to read.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifests.clone().unwrap_or_else(default_manifest_path)
    }
}
