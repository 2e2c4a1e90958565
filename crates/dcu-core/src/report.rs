//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Per-service outcomes and the run-level report."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use dcu_runtime::ServiceName;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::UpdateError;
use crate::resolver::StalenessVerdict;

/// What the update did to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateAction {
    None,
    Restarted,
    Failed,
}

impl UpdateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateAction::None => "none",
            UpdateAction::Restarted => "restarted",
            UpdateAction::Failed => "failed",
        }
    }
}

/// Terminal result for one service in one run.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub service: ServiceName,
    /// `None` when the run failed before a verdict was reached.
    pub verdict: Option<StalenessVerdict>,
    pub action: UpdateAction,
    pub error: Option<UpdateError>,
    /// Operator-facing warning, only set when warnings are enabled.
    pub warning: Option<String>,
}

impl UpdateOutcome {
    pub fn unchanged(service: ServiceName, verdict: StalenessVerdict) -> Self {
        Self {
            service,
            verdict: Some(verdict),
            action: UpdateAction::None,
            error: None,
            warning: None,
        }
    }

    pub fn restarted(service: ServiceName, verdict: StalenessVerdict) -> Self {
        Self {
            service,
            verdict: Some(verdict),
            action: UpdateAction::Restarted,
            error: None,
            warning: None,
        }
    }

    pub fn failed(
        service: ServiceName,
        verdict: Option<StalenessVerdict>,
        error: UpdateError,
    ) -> Self {
        Self {
            service,
            verdict,
            action: UpdateAction::Failed,
            error: Some(error),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.action == UpdateAction::Failed
    }
}

/// Result of one `run_update` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One outcome per requested service, in request order.
    pub outcomes: IndexMap<ServiceName, UpdateOutcome>,
    pub overall_error: Option<UpdateError>,
    /// Correlates the run's log lines.
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Build a report from outcomes listed in completion order; the first failure in
    /// that order becomes the aggregate's headline error.
    pub(crate) fn from_completed(
        completed: Vec<UpdateOutcome>,
        request_order: &[ServiceName],
    ) -> Self {
        let total = completed.len();
        let mut failures = completed
            .iter()
            .filter_map(|outcome| outcome.error.as_ref());
        let overall_error = failures.next().cloned().map(|first| UpdateError::Aggregate {
            failed: 1 + failures.count(),
            total,
            first: Box::new(first),
        });

        let mut by_service: IndexMap<ServiceName, UpdateOutcome> = completed
            .into_iter()
            .map(|outcome| (outcome.service.clone(), outcome))
            .collect();
        let mut outcomes = IndexMap::with_capacity(by_service.len());
        for service in request_order {
            if let Some(outcome) = by_service.swap_remove(service) {
                outcomes.insert(service.clone(), outcome);
            }
        }
        outcomes.extend(by_service);

        Self {
            outcomes,
            overall_error,
            ..Self::default()
        }
    }

    /// Report for a run that stopped before any service was processed.
    pub(crate) fn aborted(error: UpdateError) -> Self {
        Self {
            overall_error: Some(error),
            ..Self::default()
        }
    }

    pub(crate) fn stamped(mut self, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        self.run_id = run_id;
        self.started_at = started_at;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.overall_error.is_none()
    }

    pub fn outcome(&self, service: &str) -> Option<&UpdateOutcome> {
        self.outcomes.get(service)
    }

    /// Every failed outcome, in request order.
    pub fn failures(&self) -> impl Iterator<Item = &UpdateOutcome> {
        self.outcomes.values().filter(|outcome| outcome.is_failure())
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn count(&self, action: UpdateAction) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| outcome.action == action)
            .count()
    }
}
