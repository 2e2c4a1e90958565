//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Run-scoped cache of image identities and container descriptors."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dcu_runtime::{
    ContainerDescriptor, ContainerRef, ContainerRuntime, ImageIdentity, ImageSummary,
    RuntimeResult,
};
use parking_lot::Mutex;
use tracing::debug;

/// Every reference (and every identity itself) that resolves to a local image.
type ImageIndex = HashMap<String, ImageIdentity>;

/// Memoises runtime lookups for the duration of one update run.
///
/// The image index is rebuilt as a whole and swapped in under a single lock, so
/// readers see either the previous index or a complete new one. Container
/// descriptors are cached on first inspection and never invalidated.
pub struct IdentityCache {
    runtime: Arc<dyn ContainerRuntime>,
    images: tokio::sync::Mutex<Option<Arc<ImageIndex>>>,
    containers: Mutex<HashMap<ContainerRef, ContainerDescriptor>>,
    listings: AtomicU64,
}

impl IdentityCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            images: tokio::sync::Mutex::new(None),
            containers: Mutex::new(HashMap::new()),
            listings: AtomicU64::new(0),
        }
    }

    /// Identity a reference (or identity) resolves to locally. Unknown keys yield `None`.
    ///
    /// The first call after construction or [`invalidate_images`](Self::invalidate_images)
    /// lists every local image once.
    pub async fn image_identity<K>(&self, key: &K) -> RuntimeResult<Option<ImageIdentity>>
    where
        K: AsRef<str> + ?Sized,
    {
        let index = self.image_index().await?;
        Ok(index.get(key.as_ref()).cloned())
    }

    /// Drop the image index; the next lookup rebuilds it from the runtime.
    pub async fn invalidate_images(&self) {
        let mut slot = self.images.lock().await;
        *slot = None;
        debug!("image identity cache invalidated");
    }

    /// Descriptor for `container`, inspecting the runtime on first use.
    pub async fn container_descriptor(
        &self,
        container: &ContainerRef,
    ) -> RuntimeResult<ContainerDescriptor> {
        let cached = self.containers.lock().get(container).cloned();
        if let Some(descriptor) = cached {
            return Ok(descriptor);
        }
        let descriptor = self.runtime.inspect_container(container).await?;
        self.containers
            .lock()
            .entry(container.clone())
            .or_insert_with(|| descriptor.clone());
        Ok(descriptor)
    }

    /// Number of times the image index was built from a runtime listing.
    pub fn image_listings(&self) -> u64 {
        self.listings.load(Ordering::SeqCst)
    }

    async fn image_index(&self) -> RuntimeResult<Arc<ImageIndex>> {
        // Held across the listing so concurrent readers wait for the complete index.
        let mut slot = self.images.lock().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let summaries = self.runtime.list_known_images().await?;
        let index = Arc::new(build_index(summaries));
        self.listings.fetch_add(1, Ordering::SeqCst);
        debug!(keys = index.len(), "image identity cache rebuilt");
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }
}

fn build_index(summaries: Vec<ImageSummary>) -> ImageIndex {
    let mut index = ImageIndex::new();
    for summary in summaries {
        for reference in &summary.references {
            index.insert(reference.to_string(), summary.identity.clone());
        }
        index.insert(summary.identity.to_string(), summary.identity);
    }
    index
}
