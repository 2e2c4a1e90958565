//! ---
//! dcu_section: "02-runtime-driver"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Capability traits implemented by runtime and manifest adapters."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::types::{ContainerDescriptor, ContainerRef, ImageReference, ImageSummary, ServiceName};

/// Operations the updater needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime is reachable. Failures are reported as [`RuntimeError::Unavailable`].
    ///
    /// [`RuntimeError::Unavailable`]: crate::RuntimeError::Unavailable
    async fn ping(&self) -> RuntimeResult<()>;

    /// Container currently backing `service`, or `None` when it is not running.
    async fn current_container_ref(
        &self,
        service: &ServiceName,
    ) -> RuntimeResult<Option<ContainerRef>>;

    /// Inspect a container. Unknown containers yield [`RuntimeError::NotFound`].
    ///
    /// [`RuntimeError::NotFound`]: crate::RuntimeError::NotFound
    async fn inspect_container(&self, container: &ContainerRef)
        -> RuntimeResult<ContainerDescriptor>;

    /// Every locally known image together with the references that resolve to it.
    async fn list_known_images(&self) -> RuntimeResult<Vec<ImageSummary>>;

    /// Fetch the latest image for `service`. Compose based drivers pull by service,
    /// registry based drivers by `reference`.
    async fn pull(&self, service: &ServiceName, reference: &ImageReference) -> RuntimeResult<()>;

    async fn stop(&self, service: &ServiceName) -> RuntimeResult<()>;

    async fn remove(&self, service: &ServiceName) -> RuntimeResult<()>;

    async fn start(&self, service: &ServiceName) -> RuntimeResult<()>;

    /// Rebuild images for the given services, pulling newer base images.
    async fn build(&self, services: &[ServiceName]) -> RuntimeResult<()>;
}

/// Read-only view of the declarative service manifest.
#[async_trait]
pub trait ServiceManifest: Send + Sync {
    /// All services declared in the manifest, in declaration order.
    async fn service_names(&self) -> RuntimeResult<Vec<ServiceName>>;

    /// Image reference the manifest declares for `service`.
    async fn declared_image_reference(&self, service: &ServiceName)
        -> RuntimeResult<ImageReference>;

    async fn service_exists(&self, service: &ServiceName) -> RuntimeResult<bool> {
        Ok(self
            .service_names()
            .await?
            .iter()
            .any(|candidate| candidate == service))
    }
}
