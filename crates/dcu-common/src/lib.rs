//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Shared primitives and utilities for the updater."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
//! Shared primitives for the dc-update workspace.
//! This crate exposes configuration loading, tracing initialisation and
//! version metadata utilities consumed by the binary and the core.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{AppConfig, ComposeConfig, LoadedAppConfig, LoggingConfig, UpdateConfig};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
