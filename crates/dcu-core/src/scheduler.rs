//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Bounded worker pool fanning updates out over services."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dcu_logging::{dcu_error, dcu_warn, LogContext};
use dcu_runtime::{ContainerRuntime, ServiceManifest, ServiceName};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::IdentityCache;
use crate::error::UpdateError;
use crate::metrics::UpdateMetrics;
use crate::orchestrator::UpdateOrchestrator;
use crate::report::{RunReport, UpdateAction, UpdateOutcome};

/// Default number of services updated at the same time.
pub const DEFAULT_CONCURRENCY_CEILING: usize = 3;

/// Progress hooks invoked from worker tasks while a run is in flight.
pub trait UpdateObserver: Send + Sync {
    fn service_started(&self, _service: &ServiceName) {}

    fn service_finished(&self, _outcome: &UpdateOutcome) {}
}

/// Entry point for update runs.
///
/// Each run gets a fresh [`IdentityCache`]; nothing is carried between runs.
#[derive(Clone)]
pub struct Updater {
    runtime: Arc<dyn ContainerRuntime>,
    manifest: Arc<dyn ServiceManifest>,
    metrics: Option<Arc<UpdateMetrics>>,
    observer: Option<Arc<dyn UpdateObserver>>,
}

impl Updater {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, manifest: Arc<dyn ServiceManifest>) -> Self {
        Self {
            runtime,
            manifest,
            metrics: None,
            observer: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<UpdateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Update `services` with at most `ceiling` in flight at once.
    ///
    /// An unreachable runtime aborts the run before any service is touched.
    /// Otherwise every service gets exactly one outcome, and the report's
    /// overall error is set iff at least one of them failed.
    pub async fn run_update(
        &self,
        services: Vec<ServiceName>,
        ceiling: usize,
        show_warnings: bool,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        if let Err(err) = self.runtime.ping().await {
            dcu_error!("update run {run_id} aborted: {err}");
            return RunReport::aborted(UpdateError::RuntimeUnavailable(err))
                .stamped(run_id, started_at);
        }

        let services = dedupe(services);
        let workers = ceiling.max(1).min(services.len());
        info!(
            %run_id,
            services = services.len(),
            workers, show_warnings, "update run starting"
        );

        let cache = Arc::new(IdentityCache::new(self.runtime.clone()));
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            self.runtime.clone(),
            self.manifest.clone(),
            cache,
            show_warnings,
            self.metrics.clone(),
        ));
        let queue = Arc::new(Mutex::new(services.iter().cloned().collect::<VecDeque<_>>()));
        let completed = Arc::new(Mutex::new(Vec::with_capacity(services.len())));

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let queue = queue.clone();
                let completed = completed.clone();
                let orchestrator = orchestrator.clone();
                let metrics = self.metrics.clone();
                let observer = self.observer.clone();
                tokio::spawn(async move {
                    loop {
                        let next = queue.lock().pop_front();
                        let Some(service) = next else {
                            break;
                        };
                        debug!(worker, %service, "worker picked service");
                        if let Some(observer) = &observer {
                            observer.service_started(&service);
                        }
                        let _in_flight = metrics.as_ref().map(|m| m.track_in_flight());
                        let outcome = match AssertUnwindSafe(orchestrator.update_service(&service))
                            .catch_unwind()
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                dcu_error!(
                                    context = LogContext::for_service(service.as_str()),
                                    "update panicked; worker {worker} moves on"
                                );
                                UpdateOutcome::failed(
                                    service.clone(),
                                    None,
                                    UpdateError::Interrupted {
                                        service: service.clone(),
                                    },
                                )
                            }
                        };
                        if let Some(observer) = &observer {
                            observer.service_finished(&outcome);
                        }
                        completed.lock().push(outcome);
                    }
                })
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(err) = result {
                dcu_error!("update worker terminated abnormally: {err}");
            }
        }

        let mut completed = std::mem::take(&mut *completed.lock());
        let finished: HashSet<ServiceName> =
            completed.iter().map(|outcome| outcome.service.clone()).collect();
        for service in services.iter().filter(|service| !finished.contains(*service)) {
            let outcome = UpdateOutcome::failed(
                service.clone(),
                None,
                UpdateError::Interrupted {
                    service: service.clone(),
                },
            );
            if let Some(observer) = &self.observer {
                observer.service_finished(&outcome);
            }
            completed.push(outcome);
        }

        let report = RunReport::from_completed(completed, &services).stamped(run_id, started_at);
        for failure in report.failures() {
            if let Some(err) = &failure.error {
                dcu_error!(
                    context = LogContext::for_service(failure.service.as_str()),
                    "{err}"
                );
            }
        }
        info!(
            %run_id,
            restarted = report.count(UpdateAction::Restarted),
            unchanged = report.count(UpdateAction::None),
            failed = report.count(UpdateAction::Failed),
            elapsed_ms = report.elapsed().num_milliseconds(),
            "update run finished"
        );
        report
    }
}

fn dedupe(services: Vec<ServiceName>) -> Vec<ServiceName> {
    let mut seen = HashSet::with_capacity(services.len());
    let mut unique = Vec::with_capacity(services.len());
    for service in services {
        if seen.insert(service.clone()) {
            unique.push(service);
        } else {
            dcu_warn!(
                context = LogContext::for_service(service.as_str()),
                "service requested more than once; updating it once"
            );
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use dcu_runtime::{
        ContainerDescriptor, ContainerRef, ImageReference, ImageSummary, RuntimeError,
        RuntimeResult,
    };
    use dcu_testharness::{FakeRuntime, Operation};

    fn names(raw: &[&str]) -> Vec<ServiceName> {
        raw.iter().map(|name| ServiceName::from(*name)).collect()
    }

    fn updater_over(fake: &Arc<FakeRuntime>) -> Updater {
        Updater::new(fake.clone(), fake.clone())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ceiling_bounds_in_flight_work() {
        let fake = Arc::new(FakeRuntime::new().with_latency(Duration::from_millis(10)));
        let services: Vec<String> = (0..10).map(|i| format!("svc{i}")).collect();
        for service in &services {
            fake.run(service, &format!("app/{service}"), &format!("{service}aaa"));
        }
        let report = updater_over(&fake)
            .run_update(
                services.iter().map(|s| ServiceName::from(s.as_str())).collect(),
                3,
                false,
            )
            .await;
        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(fake.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn outcomes_follow_request_order() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web", "abc123")
            .run("api", "myapp/api", "0a0a0a")
            .declare("db", "postgres:16");
        let report = updater_over(&fake)
            .run_update(names(&["db", "web", "api"]), 2, false)
            .await;
        let order: Vec<_> = report.outcomes.keys().map(|s| s.as_str()).collect();
        assert_eq!(order, vec!["db", "web", "api"]);
    }

    #[tokio::test]
    async fn duplicate_services_are_updated_once() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web", "abc123")
            .publish("myapp/web", "def456");
        let report = updater_over(&fake)
            .run_update(names(&["web", "web"]), 3, false)
            .await;
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(fake.count(Operation::Start), 1);
    }

    #[tokio::test]
    async fn failed_ping_aborts_the_run() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web", "abc123").fail(
            Operation::Ping,
            None,
            RuntimeError::unavailable("Cannot connect to the Docker daemon"),
        );
        let report = updater_over(&fake)
            .run_update(names(&["web"]), 3, false)
            .await;
        assert!(report.outcomes.is_empty());
        assert!(matches!(
            report.overall_error,
            Some(UpdateError::RuntimeUnavailable(_))
        ));
        assert_eq!(fake.count(Operation::CurrentContainer), 0);
    }

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<String>>,
        finished: Mutex<Vec<(String, UpdateAction)>>,
    }

    impl UpdateObserver for Recorder {
        fn service_started(&self, service: &ServiceName) {
            self.started.lock().push(service.to_string());
        }

        fn service_finished(&self, outcome: &UpdateOutcome) {
            self.finished
                .lock()
                .push((outcome.service.to_string(), outcome.action));
        }
    }

    #[tokio::test]
    async fn observer_sees_every_service() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web", "abc123")
            .publish("myapp/web", "def456")
            .declare("db", "postgres:16");
        let recorder = Arc::new(Recorder::default());
        updater_over(&fake)
            .with_observer(recorder.clone())
            .run_update(names(&["web", "db"]), 1, false)
            .await;
        assert_eq!(*recorder.started.lock(), vec!["web", "db"]);
        assert_eq!(
            *recorder.finished.lock(),
            vec![
                ("web".to_owned(), UpdateAction::Restarted),
                ("db".to_owned(), UpdateAction::None)
            ]
        );
    }

    #[tokio::test]
    async fn empty_request_is_a_successful_no_op() {
        let fake = Arc::new(FakeRuntime::new());
        let report = updater_over(&fake).run_update(Vec::new(), 3, false).await;
        assert!(report.is_success());
        assert!(report.outcomes.is_empty());
        assert!(!report.run_id.is_nil());
        assert!(report.finished_at >= report.started_at);
    }

    /// Runtime whose `current_container_ref` panics for one service.
    struct PanickingRuntime {
        inner: Arc<FakeRuntime>,
        poisoned: ServiceName,
    }

    #[async_trait]
    impl ContainerRuntime for PanickingRuntime {
        async fn ping(&self) -> RuntimeResult<()> {
            self.inner.ping().await
        }

        async fn current_container_ref(
            &self,
            service: &ServiceName,
        ) -> RuntimeResult<Option<ContainerRef>> {
            if *service == self.poisoned {
                panic!("driver bug");
            }
            self.inner.current_container_ref(service).await
        }

        async fn inspect_container(
            &self,
            container: &ContainerRef,
        ) -> RuntimeResult<ContainerDescriptor> {
            self.inner.inspect_container(container).await
        }

        async fn list_known_images(&self) -> RuntimeResult<Vec<ImageSummary>> {
            self.inner.list_known_images().await
        }

        async fn pull(
            &self,
            service: &ServiceName,
            reference: &ImageReference,
        ) -> RuntimeResult<()> {
            self.inner.pull(service, reference).await
        }

        async fn stop(&self, service: &ServiceName) -> RuntimeResult<()> {
            self.inner.stop(service).await
        }

        async fn remove(&self, service: &ServiceName) -> RuntimeResult<()> {
            self.inner.remove(service).await
        }

        async fn start(&self, service: &ServiceName) -> RuntimeResult<()> {
            self.inner.start(service).await
        }

        async fn build(&self, services: &[ServiceName]) -> RuntimeResult<()> {
            self.inner.build(services).await
        }
    }

    #[tokio::test]
    async fn panic_in_one_service_leaves_the_queue_running() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web", "abc123")
            .run("api", "myapp/api", "0a0a0a")
            .publish("myapp/api", "0b0b0b");
        let runtime = Arc::new(PanickingRuntime {
            inner: fake.clone(),
            poisoned: ServiceName::from("web"),
        });
        let report = Updater::new(runtime, fake.clone())
            .run_update(names(&["web", "api"]), 1, false)
            .await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcome("web").and_then(|o| o.error.as_ref()),
            Some(UpdateError::Interrupted { .. })
        ));
        let api = report.outcome("api").expect("api outcome");
        assert_eq!(api.action, UpdateAction::Restarted);
        assert!(fake.operations_for("api").contains(&Operation::Start));
        match report.overall_error.as_ref().expect("web failed") {
            UpdateError::Aggregate { failed, total, .. } => assert_eq!((*failed, *total), (1, 2)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
