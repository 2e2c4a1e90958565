//! ---
//! dcu_section: "03-persistence-logging"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Prometheus metrics recorded by update runs."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

use crate::report::UpdateAction;
use crate::restart::RestartStep;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Counters and timings for update runs.
#[derive(Clone)]
pub struct UpdateMetrics {
    outcomes_total: IntCounterVec,
    restarts_total: IntCounterVec,
    service_seconds: Histogram,
    in_flight: IntGauge,
}

impl UpdateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let outcomes_total = IntCounterVec::new(
            Opts::new(
                "dc_update_outcomes_total",
                "Terminal per-service outcomes grouped by action",
            ),
            &["action"],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new(
                "dc_update_restarts_total",
                "Restart transition steps grouped by step and result",
            ),
            &["step", "result"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let service_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "dc_update_service_seconds",
                "Wall-clock time spent updating one service",
            )
            .buckets(prometheus::exponential_buckets(0.05, 2.0, 12)?),
        )?;
        registry.register(Box::new(service_seconds.clone()))?;

        let in_flight = IntGauge::with_opts(Opts::new(
            "dc_update_in_flight",
            "Services currently being updated",
        ))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            outcomes_total,
            restarts_total,
            service_seconds,
            in_flight,
        })
    }

    pub fn record_outcome(&self, action: UpdateAction, elapsed: Duration) {
        self.outcomes_total
            .with_label_values(&[action.as_str()])
            .inc();
        self.service_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn record_restart_step(&self, step: RestartStep, succeeded: bool) {
        let result = if succeeded { "ok" } else { "error" };
        self.restarts_total
            .with_label_values(&[step.as_str(), result])
            .inc();
    }

    /// Count a service as in flight until the returned guard is dropped.
    pub fn track_in_flight(&self) -> InFlightGuard {
        self.in_flight.inc();
        InFlightGuard {
            gauge: self.in_flight.clone(),
        }
    }
}

/// Decrements the in-flight gauge on drop, including when a worker unwinds.
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> u64 {
        registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    #[test]
    fn outcomes_and_steps_are_counted() {
        let registry = new_registry();
        let metrics = UpdateMetrics::new(registry.clone()).expect("metrics register");
        metrics.record_outcome(UpdateAction::Restarted, Duration::from_millis(120));
        metrics.record_outcome(UpdateAction::None, Duration::from_millis(10));
        metrics.record_outcome(UpdateAction::None, Duration::from_millis(12));
        metrics.record_restart_step(RestartStep::Stop, true);
        metrics.record_restart_step(RestartStep::Remove, false);

        assert_eq!(
            counter_value(&registry, "dc_update_outcomes_total", &[("action", "none")]),
            2
        );
        assert_eq!(
            counter_value(
                &registry,
                "dc_update_outcomes_total",
                &[("action", "restarted")]
            ),
            1
        );
        assert_eq!(
            counter_value(
                &registry,
                "dc_update_restarts_total",
                &[("step", "remove"), ("result", "error")]
            ),
            1
        );
    }

    #[test]
    fn in_flight_guard_restores_gauge() {
        let metrics = UpdateMetrics::new(new_registry()).expect("metrics register");
        {
            let _first = metrics.track_in_flight();
            let _second = metrics.track_in_flight();
            assert_eq!(metrics.in_flight.get(), 2);
        }
        assert_eq!(metrics.in_flight.get(), 0);
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = new_registry();
        UpdateMetrics::new(registry.clone()).expect("first registration");
        assert!(UpdateMetrics::new(registry).is_err());
    }
}
