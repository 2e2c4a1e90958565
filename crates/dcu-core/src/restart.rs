//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Stop, remove and start a single service."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use dcu_logging::{dcu_debug, dcu_warn, LogContext};
use dcu_runtime::{ContainerRuntime, RuntimeResult, ServiceName};

use crate::error::UpdateError;
use crate::metrics::UpdateMetrics;

/// One step of the restart transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestartStep {
    Stop,
    Remove,
    Start,
}

impl RestartStep {
    /// Steps in execution order.
    pub const SEQUENCE: [RestartStep; 3] = [RestartStep::Stop, RestartStep::Remove, RestartStep::Start];

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartStep::Stop => "stop",
            RestartStep::Remove => "remove",
            RestartStep::Start => "start",
        }
    }
}

impl fmt::Display for RestartStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replaces a service's container: stop, remove, start.
///
/// The first failing step ends the transition. Nothing is rolled back, so a
/// service can be left stopped or removed.
pub struct RestartTransition {
    runtime: Arc<dyn ContainerRuntime>,
    metrics: Option<Arc<UpdateMetrics>>,
}

impl RestartTransition {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, metrics: Option<Arc<UpdateMetrics>>) -> Self {
        Self { runtime, metrics }
    }

    pub async fn restart(&self, service: &ServiceName) -> Result<(), UpdateError> {
        for step in RestartStep::SEQUENCE {
            let ctx = LogContext::for_service(service.as_str()).with_stage(step.as_str());
            dcu_debug!(context = ctx, "restart step starting");
            let result = self.apply(step, service).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_restart_step(step, result.is_ok());
            }
            if let Err(source) = result {
                dcu_warn!(context = ctx, "restart step failed: {source}");
                return Err(UpdateError::Step {
                    service: service.clone(),
                    step,
                    source,
                });
            }
        }
        Ok(())
    }

    async fn apply(&self, step: RestartStep, service: &ServiceName) -> RuntimeResult<()> {
        match step {
            RestartStep::Stop => self.runtime.stop(service).await,
            RestartStep::Remove => self.runtime.remove(service).await,
            RestartStep::Start => self.runtime.start(service).await,
        }
    }
}
