//! ---
//! dcu_section: "02-runtime-driver"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Container runtime capabilities and compose CLI adapter."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
//! Capabilities the updater needs from a container runtime and a service
//! manifest, plus the `docker compose` driver that provides both.

pub mod compose;
pub mod driver;
pub mod error;
pub mod types;

pub use compose::ComposeCli;
pub use driver::{ContainerRuntime, ServiceManifest};
pub use error::{RuntimeError, RuntimeResult};
pub use types::{
    ContainerDescriptor, ContainerRef, ImageIdentity, ImageReference, ImageSummary, ServiceName,
};
