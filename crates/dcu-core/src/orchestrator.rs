//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Per-service update state machine."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use dcu_logging::{log_service_event, LogContext, ServiceEventOutcome};
use dcu_runtime::{ContainerRuntime, ServiceManifest, ServiceName};
use tracing::trace;

use crate::cache::IdentityCache;
use crate::error::{Stage, UpdateError};
use crate::metrics::UpdateMetrics;
use crate::report::{UpdateAction, UpdateOutcome};
use crate::resolver::{StalenessResolver, StalenessVerdict};
use crate::restart::RestartTransition;

/// Phase of a single service's update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Validating,
    Resolving,
    NoOp,
    Restarting,
    Done,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePhase::Validating => "validating",
            UpdatePhase::Resolving => "resolving",
            UpdatePhase::NoOp => "no-op",
            UpdatePhase::Restarting => "restarting",
            UpdatePhase::Done => "done",
        }
    }
}

enum State {
    Validating,
    Resolving,
    NoOp(StalenessVerdict),
    Restarting(StalenessVerdict),
    Done(UpdateOutcome),
}

impl State {
    fn phase(&self) -> UpdatePhase {
        match self {
            State::Validating => UpdatePhase::Validating,
            State::Resolving => UpdatePhase::Resolving,
            State::NoOp(_) => UpdatePhase::NoOp,
            State::Restarting(_) => UpdatePhase::Restarting,
            State::Done(_) => UpdatePhase::Done,
        }
    }
}

/// Drives one service from validation to a terminal [`UpdateOutcome`].
///
/// The machine is acyclic and every path ends in `Done`; errors become failed
/// outcomes rather than being returned.
pub struct UpdateOrchestrator {
    manifest: Arc<dyn ServiceManifest>,
    resolver: StalenessResolver,
    restart: RestartTransition,
    show_warnings: bool,
    metrics: Option<Arc<UpdateMetrics>>,
}

impl UpdateOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        manifest: Arc<dyn ServiceManifest>,
        cache: Arc<IdentityCache>,
        show_warnings: bool,
        metrics: Option<Arc<UpdateMetrics>>,
    ) -> Self {
        Self {
            resolver: StalenessResolver::new(runtime.clone(), manifest.clone(), cache),
            restart: RestartTransition::new(runtime, metrics.clone()),
            manifest,
            show_warnings,
            metrics,
        }
    }

    pub async fn update_service(&self, service: &ServiceName) -> UpdateOutcome {
        let started = Instant::now();
        let mut state = State::Validating;
        let outcome = loop {
            trace!(%service, phase = state.phase().as_str(), "update phase");
            state = match state {
                State::Validating => self.validate(service).await,
                State::Resolving => match self.resolver.resolve(service).await {
                    Ok(verdict) if verdict.is_stale() => State::Restarting(verdict),
                    Ok(verdict) => State::NoOp(verdict),
                    Err(err) => State::Done(UpdateOutcome::failed(service.clone(), None, err)),
                },
                State::NoOp(verdict) => State::Done(self.no_op(service, verdict)),
                State::Restarting(verdict) => match self.restart.restart(service).await {
                    Ok(()) => State::Done(UpdateOutcome::restarted(service.clone(), verdict)),
                    Err(err) => {
                        State::Done(UpdateOutcome::failed(service.clone(), Some(verdict), err))
                    }
                },
                State::Done(outcome) => break outcome,
            };
        };

        self.log_outcome(&outcome);
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(outcome.action, started.elapsed());
        }
        outcome
    }

    async fn validate(&self, service: &ServiceName) -> State {
        match self.manifest.service_exists(service).await {
            Ok(true) => State::Resolving,
            Ok(false) => State::Done(UpdateOutcome::failed(
                service.clone(),
                None,
                UpdateError::UnknownService {
                    service: service.clone(),
                },
            )),
            Err(err) => State::Done(UpdateOutcome::failed(
                service.clone(),
                None,
                UpdateError::stage(service, Stage::ValidateService, err),
            )),
        }
    }

    fn no_op(&self, service: &ServiceName, verdict: StalenessVerdict) -> UpdateOutcome {
        let not_running = verdict == StalenessVerdict::NotRunning;
        let outcome = UpdateOutcome::unchanged(service.clone(), verdict);
        if not_running && self.show_warnings {
            outcome.with_warning(format!("service '{service}' is not running"))
        } else {
            outcome
        }
    }

    fn log_outcome(&self, outcome: &UpdateOutcome) {
        let ctx = LogContext::for_service(outcome.service.as_str()).with_stage("done");
        let (event_outcome, message) = match (&outcome.action, &outcome.error) {
            (UpdateAction::Failed, Some(err)) => (ServiceEventOutcome::Fault, err.to_string()),
            (UpdateAction::Failed, None) => {
                (ServiceEventOutcome::Fault, "update failed".to_owned())
            }
            (UpdateAction::Restarted, _) => (
                ServiceEventOutcome::Restarted,
                verdict_message(outcome.verdict.as_ref()),
            ),
            (UpdateAction::None, _) => match &outcome.warning {
                Some(warning) => (ServiceEventOutcome::Warning, warning.clone()),
                None => (
                    ServiceEventOutcome::Unchanged,
                    verdict_message(outcome.verdict.as_ref()),
                ),
            },
        };
        log_service_event(Some(&ctx), "update.outcome", &message, event_outcome);
    }
}

fn verdict_message(verdict: Option<&StalenessVerdict>) -> String {
    verdict
        .map(ToString::to_string)
        .unwrap_or_else(|| "no verdict".to_owned())
}
