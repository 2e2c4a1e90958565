//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Error taxonomy for per-service updates and whole runs."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::fmt;

use dcu_runtime::{RuntimeError, ServiceName};
use thiserror::Error;

use crate::restart::RestartStep;

/// Validation or resolution step that talks to the runtime or the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ValidateService,
    ResolveContainer,
    ResolveImageReference,
    InspectContainer,
    Pull,
    ListImages,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ValidateService => "validate-service",
            Stage::ResolveContainer => "resolve-container",
            Stage::ResolveImageReference => "resolve-image-reference",
            Stage::InspectContainer => "inspect-container",
            Stage::Pull => "pull",
            Stage::ListImages => "list-images",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures produced while updating services.
#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    /// The service is not declared in the manifest.
    #[error("service '{service}' does not exist in the manifest")]
    UnknownService { service: ServiceName },
    /// The runtime could not be reached before the run started.
    #[error(transparent)]
    RuntimeUnavailable(RuntimeError),
    /// Resolving the staleness verdict failed.
    #[error("{service}: {stage} failed: {source}")]
    Stage {
        service: ServiceName,
        stage: Stage,
        source: RuntimeError,
    },
    /// One step of the restart transition failed; later steps were not attempted.
    #[error("{service}: {step} failed: {source}")]
    Step {
        service: ServiceName,
        step: RestartStep,
        source: RuntimeError,
    },
    /// The orchestration never reported back (the worker running it panicked).
    #[error("{service}: update did not complete")]
    Interrupted { service: ServiceName },
    /// One or more services failed.
    #[error("{failed} of {total} services failed; first failure: {first}")]
    Aggregate {
        failed: usize,
        total: usize,
        first: Box<UpdateError>,
    },
}

impl UpdateError {
    pub(crate) fn stage(service: &ServiceName, stage: Stage, source: RuntimeError) -> Self {
        Self::Stage {
            service: service.clone(),
            stage,
            source,
        }
    }

    /// Service the error belongs to, when it is scoped to one.
    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            UpdateError::UnknownService { service }
            | UpdateError::Stage { service, .. }
            | UpdateError::Step { service, .. }
            | UpdateError::Interrupted { service } => Some(service),
            UpdateError::RuntimeUnavailable(_) | UpdateError::Aggregate { .. } => None,
        }
    }

    /// Whether the runtime was unreachable, either before the run or for this service.
    pub fn is_runtime_unavailable(&self) -> bool {
        match self {
            UpdateError::RuntimeUnavailable(_) => true,
            UpdateError::Stage { source, .. } | UpdateError::Step { source, .. } => {
                source.is_unavailable()
            }
            UpdateError::Aggregate { first, .. } => first.is_runtime_unavailable(),
            UpdateError::UnknownService { .. } | UpdateError::Interrupted { .. } => false,
        }
    }
}
