//! ---
//! dcu_section: "05-cli"
//! dcu_subsection: "binary"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Update command: configuration, build step and the update run."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args};
use dcu_common::config::{AppConfig, DEFAULT_CONFIG_FILE};
use dcu_common::logging::init_tracing;
use dcu_common::version::VersionInfo;
use dcu_core::Updater;
use dcu_runtime::{ComposeCli, ContainerRuntime, ServiceManifest, ServiceName};
use tracing::{debug, info};

use crate::progress::{self, ConsoleProgress};

/// Options for an update run.
#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Services to update; every service in the compose file when omitted.
    #[arg(value_name = "SERVICE")]
    pub services: Vec<String>,

    /// Path to the docker compose file.
    #[arg(short = 'f', long = "file", value_name = "FILE", value_parser = existing_file)]
    pub file: Option<PathBuf>,

    /// Service to build before updating. Can be given multiple times.
    #[arg(short = 'b', long = "build", value_name = "SERVICE", action = ArgAction::Append)]
    pub build: Vec<String>,

    /// Report services that have no running container.
    #[arg(long = "show-warnings", action = ArgAction::SetTrue)]
    pub show_warnings: bool,

    /// Plain output: outcome lines only, no spinners.
    #[arg(short = 'n', long = "non-interactive", action = ArgAction::SetTrue)]
    pub non_interactive: bool,

    /// Maximum number of services updated at the same time.
    #[arg(long, value_name = "N", value_parser = positive_count)]
    pub concurrency: Option<usize>,

    /// Configuration file (dc-update.toml in the working directory is used when present).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl UpdateArgs {
    /// Command line values take precedence over the configuration file.
    fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(file) = &self.file {
            config.compose.file = file.clone();
        }
        if !self.build.is_empty() {
            config.update.build = self.build.clone();
        }
        if self.show_warnings {
            config.update.show_warnings = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.update.concurrency = concurrency;
        }
        config
    }
}

fn existing_file(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("docker-compose file does not exist: {raw}"))
    }
}

fn positive_count(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_owned()),
        Ok(value) => Ok(value),
        Err(err) => Err(err.to_string()),
    }
}

/// Execute an update run and map its report to the process exit status.
pub fn run(args: UpdateArgs) -> Result<ExitCode> {
    let mut candidates = Vec::new();
    if let Some(path) = &args.config {
        if !path.is_file() {
            bail!("config file does not exist: {}", path.display());
        }
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_FILE));
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = args.apply(loaded.config);
    config.validate()?;

    init_tracing("dc-update", &config.logging)?;
    debug!(
        version = %VersionInfo::current().cli_string(),
        config = ?loaded.source,
        "configuration resolved"
    );

    if !config.compose.file.is_file() {
        bail!(
            "docker-compose file does not exist: {}",
            config.compose.file.display()
        );
    }

    let interactive = !args.non_interactive && progress::is_interactive();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(execute(config, args.services, interactive))
}

async fn execute(config: AppConfig, requested: Vec<String>, interactive: bool) -> Result<ExitCode> {
    let driver = Arc::new(
        ComposeCli::from_config(&config.compose)
            .context("failed to initialise docker compose driver")?,
    );

    let services: Vec<ServiceName> = if requested.is_empty() {
        driver
            .service_names()
            .await
            .context("failed to get service names")?
    } else {
        requested.into_iter().map(ServiceName::from).collect()
    };

    if !config.update.build.is_empty() {
        println!("Building containers: {}", config.update.build.join(", "));
        let targets: Vec<ServiceName> = config
            .update
            .build
            .iter()
            .map(|service| ServiceName::from(service.as_str()))
            .collect();
        driver
            .build(&targets)
            .await
            .context("failed to build containers")?;
    }

    info!(
        compose_file = %driver.compose_file().display(),
        services = services.len(),
        "starting update"
    );
    let report = Updater::new(driver.clone(), driver)
        .with_observer(Arc::new(ConsoleProgress::new(interactive)))
        .run_update(
            services,
            config.update.concurrency,
            config.update.show_warnings,
        )
        .await;

    match report.overall_error {
        Some(err) => {
            eprintln!("Error: failed to update containers: {err}");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}
