//! ---
//! dcu_section: "06-test-harness"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Scripted container runtime and manifest for tests."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
//! In-memory stand-in for the container runtime and the compose manifest.
//!
//! [`FakeRuntime`] keeps a small model of local images, a "remote registry"
//! consulted on pull, and one container per service. Every capability call is
//! journalled, can be delayed by a fixed latency, and can be made to fail per
//! operation and service. The runtime also tracks the highest number of calls
//! that were in flight at the same time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dcu_runtime::{
    ContainerDescriptor, ContainerRef, ContainerRuntime, ImageIdentity, ImageReference,
    ImageSummary, RuntimeError, RuntimeResult, ServiceManifest, ServiceName,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

/// Capability invoked on the fake runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    CurrentContainer,
    Inspect,
    ListImages,
    Pull,
    Stop,
    Remove,
    Start,
    Build,
    ServiceNames,
    DeclaredReference,
}

/// One journalled capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub service: Option<ServiceName>,
}

#[derive(Debug, Default)]
struct FakeService {
    declared: Option<ImageReference>,
    container: Option<ContainerRef>,
    running: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    services: IndexMap<ServiceName, FakeService>,
    local_images: BTreeMap<ImageIdentity, BTreeSet<ImageReference>>,
    remote: HashMap<ImageReference, ImageIdentity>,
    containers: HashMap<ContainerRef, ContainerDescriptor>,
    failures: HashMap<(Operation, Option<ServiceName>), RuntimeError>,
    journal: Vec<Call>,
    next_container: u64,
}

impl FakeState {
    fn injected(&self, operation: Operation, service: Option<&ServiceName>) -> Option<RuntimeError> {
        service
            .and_then(|service| self.failures.get(&(operation, Some(service.clone()))))
            .or_else(|| self.failures.get(&(operation, None)))
            .cloned()
    }

    fn owner_of(&self, container: &ContainerRef) -> Option<ServiceName> {
        self.services
            .iter()
            .find(|(_, entry)| entry.container.as_ref() == Some(container))
            .map(|(name, _)| name.clone())
    }

    fn tag(&mut self, reference: ImageReference, identity: ImageIdentity) {
        for references in self.local_images.values_mut() {
            references.remove(&reference);
        }
        self.local_images
            .entry(identity)
            .or_default()
            .insert(reference);
    }

    fn local_identity(&self, reference: &ImageReference) -> Option<ImageIdentity> {
        self.local_images
            .iter()
            .find(|(_, references)| references.contains(reference))
            .map(|(identity, _)| identity.clone())
    }

    fn fetch(&mut self, reference: &ImageReference) {
        if let Some(identity) = self.remote.get(reference).cloned() {
            self.tag(reference.clone(), identity);
        }
    }

    fn service_mut(&mut self, service: &ServiceName) -> RuntimeResult<&mut FakeService> {
        self.services
            .get_mut(service)
            .ok_or_else(|| RuntimeError::manifest(format!("no such service: {service}")))
    }

    fn start_container(&mut self, service: &ServiceName) -> RuntimeResult<ContainerRef> {
        let declared = self
            .service_mut(service)?
            .declared
            .clone()
            .ok_or_else(|| RuntimeError::manifest(format!("service {service} has no image")))?;
        let identity = self
            .local_identity(&declared)
            .ok_or_else(|| RuntimeError::not_found(format!("image {declared}")))?;
        self.next_container += 1;
        let id = ContainerRef::parse(&format!("{service}-{}", self.next_container))
            .ok_or_else(|| RuntimeError::parse("container id", "empty"))?;
        self.containers.insert(
            id.clone(),
            ContainerDescriptor {
                id: id.clone(),
                image: Some(identity),
            },
        );
        let entry = self.service_mut(service)?;
        entry.container = Some(id.clone());
        entry.running = true;
        Ok(id)
    }
}

struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted runtime implementing both [`ContainerRuntime`] and [`ServiceManifest`].
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn identity(raw: &str) -> ImageIdentity {
    ImageIdentity::parse(raw).unwrap_or_else(|| panic!("invalid image identity {raw:?}"))
}

fn reference(raw: &str) -> ImageReference {
    ImageReference::parse(raw).unwrap_or_else(|| panic!("invalid image reference {raw:?}"))
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every capability call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Declare a service that has no running container.
    pub fn declare(&self, service: &str, image: &str) -> &Self {
        self.state.lock().services.insert(
            ServiceName::from(service),
            FakeService {
                declared: Some(reference(image)),
                ..FakeService::default()
            },
        );
        self
    }

    /// Declare a service and start it from a local image `identity` tagged `image`.
    pub fn run(&self, service: &str, image: &str, image_identity: &str) -> &Self {
        self.declare(service, image);
        let mut state = self.state.lock();
        state.tag(reference(image), identity(image_identity));
        if let Err(err) = state.start_container(&ServiceName::from(service)) {
            panic!("failed to start fake service {service}: {err}");
        }
        self
    }

    /// Make `image` resolve to `image_identity` on the next pull.
    pub fn publish(&self, image: &str, image_identity: &str) -> &Self {
        self.state
            .lock()
            .remote
            .insert(reference(image), identity(image_identity));
        self
    }

    /// Remove `image` from the local image store; the image it pointed at stays.
    pub fn untag(&self, image: &str) -> &Self {
        let image = reference(image);
        for references in self.state.lock().local_images.values_mut() {
            references.remove(&image);
        }
        self
    }

    /// Fail `operation` for `service` (or for every service when `None`) with `error`.
    pub fn fail(&self, operation: Operation, service: Option<&str>, error: RuntimeError) -> &Self {
        self.state
            .lock()
            .failures
            .insert((operation, service.map(ServiceName::from)), error);
        self
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Drop the container record while `ps` still reports it, as if it vanished mid-run.
    pub fn forget_container(&self, service: &str) {
        let mut state = self.state.lock();
        let container = state
            .services
            .get(&ServiceName::from(service))
            .and_then(|entry| entry.container.clone());
        if let Some(container) = container {
            state.containers.remove(&container);
        }
    }

    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().journal.clone()
    }

    /// Operations recorded for `service`, in call order.
    pub fn operations_for(&self, service: &str) -> Vec<Operation> {
        let service = ServiceName::from(service);
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| call.service.as_ref() == Some(&service))
            .map(|call| call.operation)
            .collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Highest number of simultaneously in-flight capability calls observed so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn container_of(&self, service: &str) -> Option<ContainerRef> {
        self.state
            .lock()
            .services
            .get(&ServiceName::from(service))
            .and_then(|entry| entry.container.clone())
    }

    /// Identity of the image the service's current container was created from.
    pub fn running_identity(&self, service: &str) -> Option<ImageIdentity> {
        let state = self.state.lock();
        let entry = state.services.get(&ServiceName::from(service))?;
        if !entry.running {
            return None;
        }
        let container = entry.container.as_ref()?;
        state.containers.get(container)?.image.clone()
    }

    async fn call<T>(
        &self,
        operation: Operation,
        service: Option<ServiceName>,
        apply: impl FnOnce(&mut FakeState) -> RuntimeResult<T> + Send,
    ) -> RuntimeResult<T> {
        trace!(?operation, ?service, "fake runtime call");
        self.state.lock().journal.push(Call {
            operation,
            service: service.clone(),
        });
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.state.lock();
        if let Some(error) = state.injected(operation, service.as_ref()) {
            return Err(error);
        }
        apply(&mut *state)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.call(Operation::Ping, None, |_| Ok(())).await
    }

    async fn current_container_ref(
        &self,
        service: &ServiceName,
    ) -> RuntimeResult<Option<ContainerRef>> {
        self.call(Operation::CurrentContainer, Some(service.clone()), |state| {
            Ok(state
                .services
                .get(service)
                .filter(|entry| entry.running)
                .and_then(|entry| entry.container.clone()))
        })
        .await
    }

    async fn inspect_container(
        &self,
        container: &ContainerRef,
    ) -> RuntimeResult<ContainerDescriptor> {
        let owner = self.state.lock().owner_of(container);
        self.call(Operation::Inspect, owner, |state| {
            state
                .containers
                .get(container)
                .cloned()
                .ok_or_else(|| RuntimeError::not_found(format!("container {container}")))
        })
        .await
    }

    async fn list_known_images(&self) -> RuntimeResult<Vec<ImageSummary>> {
        self.call(Operation::ListImages, None, |state| {
            Ok(state
                .local_images
                .iter()
                .map(|(identity, references)| {
                    ImageSummary::new(identity.clone(), references.iter().cloned())
                })
                .collect())
        })
        .await
    }

    async fn pull(&self, service: &ServiceName, reference: &ImageReference) -> RuntimeResult<()> {
        self.call(Operation::Pull, Some(service.clone()), |state| {
            state.fetch(reference);
            Ok(())
        })
        .await
    }

    async fn stop(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.call(Operation::Stop, Some(service.clone()), |state| {
            state.service_mut(service)?.running = false;
            Ok(())
        })
        .await
    }

    async fn remove(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.call(Operation::Remove, Some(service.clone()), |state| {
            let entry = state.service_mut(service)?;
            entry.running = false;
            if let Some(container) = entry.container.take() {
                state.containers.remove(&container);
            }
            Ok(())
        })
        .await
    }

    async fn start(&self, service: &ServiceName) -> RuntimeResult<()> {
        self.call(Operation::Start, Some(service.clone()), |state| {
            state.start_container(service).map(|_| ())
        })
        .await
    }

    async fn build(&self, services: &[ServiceName]) -> RuntimeResult<()> {
        self.call(Operation::Build, None, |state| {
            for service in services {
                let declared = state.service_mut(service)?.declared.clone();
                if let Some(declared) = declared {
                    state.fetch(&declared);
                }
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ServiceManifest for FakeRuntime {
    async fn service_names(&self) -> RuntimeResult<Vec<ServiceName>> {
        self.call(Operation::ServiceNames, None, |state| {
            Ok(state.services.keys().cloned().collect())
        })
        .await
    }

    async fn declared_image_reference(
        &self,
        service: &ServiceName,
    ) -> RuntimeResult<ImageReference> {
        self.call(Operation::DeclaredReference, Some(service.clone()), |state| {
            state.service_mut(service)?.declared.clone().ok_or_else(|| {
                RuntimeError::manifest(format!("could not find image for service '{service}'"))
            })
        })
        .await
    }
}
