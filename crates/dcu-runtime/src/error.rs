//! ---
//! dcu_section: "02-runtime-driver"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Errors reported by runtime and manifest adapters."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

/// Result alias used by the runtime capabilities.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures surfaced by a container runtime or manifest adapter.
///
/// Payloads are plain strings so that errors can be cloned into per-service
/// reports and the run-level aggregate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be reached at all.
    #[error("container runtime unavailable: {message}")]
    Unavailable { message: String },
    /// The requested container or image does not exist.
    #[error("{what} not found")]
    NotFound { what: String },
    /// A runtime command ran but reported failure.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    /// A runtime command exceeded the configured timeout.
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },
    /// The runtime command could not be spawned or awaited.
    #[error("failed to run `{command}`: {message}")]
    Io { command: String, message: String },
    /// Runtime output did not have the expected shape.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },
    /// The manifest does not describe the service the way the updater needs.
    #[error("manifest error: {message}")]
    Manifest { message: String },
}

impl RuntimeError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
