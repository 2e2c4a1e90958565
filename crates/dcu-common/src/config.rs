//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Shared primitives and utilities for the updater."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Default number of services updated at the same time.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// File name looked up in the working directory when no explicit config is given.
pub const DEFAULT_CONFIG_FILE: &str = "dc-update.toml";

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_docker_binary() -> String {
    "docker".to_owned()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_level() -> String {
    "warn".to_owned()
}

/// Primary configuration object for the updater.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "DC_UPDATE_CONFIG";

    /// Load configuration from the first existing candidate, respecting the
    /// `DC_UPDATE_CONFIG` override, together with the effective source path.
    /// Falls back to defaults when nothing exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.compose.validate()?;
        self.update.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the compose manifest and how the container runtime is invoked.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_file")]
    pub file: PathBuf,
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// Upper bound applied to each individual runtime command.
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub command_timeout: Option<Duration>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            file: default_compose_file(),
            docker_binary: default_docker_binary(),
            command_timeout: None,
        }
    }
}

impl ComposeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file.as_os_str().is_empty() {
            return Err(anyhow!("compose.file cannot be empty"));
        }
        if self.docker_binary.trim().is_empty() {
            return Err(anyhow!("compose.docker_binary cannot be empty"));
        }
        if matches!(self.command_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(anyhow!("compose.command_timeout must be at least one second"));
        }
        Ok(())
    }
}

/// Settings for the update run itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Maximum number of services processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Report services that have no running container.
    #[serde(default)]
    pub show_warnings: bool,
    /// Services rebuilt (`compose build --pull`) before the update starts.
    #[serde(default)]
    pub build: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            show_warnings: false,
            build: Vec::new(),
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow!("update.concurrency must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; no file is written when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
        }
    }
}
