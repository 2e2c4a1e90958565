//! ---
//! dcu_section: "03-logging"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Structured logging adapters and sinks."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Per-service logging context shared by the update pipeline.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Compose service the event belongs to.
    pub service: Option<&'a str>,
    /// Container identifier, when one is known.
    pub container: Option<&'a str>,
    /// Pipeline stage (validating, resolving, restarting, ...).
    pub stage: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context scoped to a single service.
    pub fn for_service(service: &'a str) -> Self {
        Self::new().with_service(service)
    }

    /// Attach a service name.
    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }

    /// Attach a container identifier.
    pub fn with_container(mut self, container: &'a str) -> Self {
        self.container = Some(container);
        self
    }

    /// Attach a pipeline stage.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// High-level outcome used when emitting per-service log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventOutcome {
    /// Nothing had to change.
    Unchanged,
    /// The service was restarted on a new image.
    Restarted,
    /// The service was skipped with a warning.
    Warning,
    /// The operation failed or was aborted.
    Fault,
}

impl ServiceEventOutcome {
    /// Stable lowercase label for the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEventOutcome::Unchanged => "unchanged",
            ServiceEventOutcome::Restarted => "restarted",
            ServiceEventOutcome::Warning => "warning",
            ServiceEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized per-service event.
pub fn log_service_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: ServiceEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    // `tracing::event!` needs a constant level.
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                service = ctx.service.unwrap_or(""),
                container = ctx.container.unwrap_or(""),
                stage = ctx.stage.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        ServiceEventOutcome::Fault => emit!(Level::ERROR),
        ServiceEventOutcome::Warning => emit!(Level::WARN),
        ServiceEventOutcome::Restarted => emit!(Level::INFO),
        ServiceEventOutcome::Unchanged => emit!(Level::DEBUG),
    }
}
