//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Decide whether a service's running container is stale."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use dcu_logging::{dcu_debug, LogContext};
use dcu_runtime::{ContainerRuntime, ImageIdentity, ServiceManifest, ServiceName};

use crate::cache::IdentityCache;
use crate::error::{Stage, UpdateError};

/// Point-in-time comparison of the running image against the freshly pulled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StalenessVerdict {
    NotRunning,
    UpToDate,
    Stale {
        current: ImageIdentity,
        target: ImageIdentity,
    },
}

impl StalenessVerdict {
    /// Compare identities. Either side missing never counts as stale.
    pub fn compare(current: Option<ImageIdentity>, target: Option<ImageIdentity>) -> Self {
        match (current, target) {
            (Some(current), Some(target)) if current != target => {
                StalenessVerdict::Stale { current, target }
            }
            _ => StalenessVerdict::UpToDate,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, StalenessVerdict::Stale { .. })
    }
}

impl fmt::Display for StalenessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessVerdict::NotRunning => f.write_str("not running"),
            StalenessVerdict::UpToDate => f.write_str("up to date"),
            StalenessVerdict::Stale { current, target } => {
                write!(f, "stale ({} -> {})", current.short(), target.short())
            }
        }
    }
}

/// Produces a [`StalenessVerdict`] per service.
///
/// Resolution pulls the declared image before comparing, so the target always
/// reflects what the registry currently serves.
pub struct StalenessResolver {
    runtime: Arc<dyn ContainerRuntime>,
    manifest: Arc<dyn ServiceManifest>,
    cache: Arc<IdentityCache>,
}

impl StalenessResolver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        manifest: Arc<dyn ServiceManifest>,
        cache: Arc<IdentityCache>,
    ) -> Self {
        Self {
            runtime,
            manifest,
            cache,
        }
    }

    pub async fn resolve(&self, service: &ServiceName) -> Result<StalenessVerdict, UpdateError> {
        let ctx = LogContext::for_service(service.as_str()).with_stage("resolving");

        let Some(container) = self
            .runtime
            .current_container_ref(service)
            .await
            .map_err(|err| UpdateError::stage(service, Stage::ResolveContainer, err))?
        else {
            dcu_debug!(context = ctx, "no running container");
            return Ok(StalenessVerdict::NotRunning);
        };
        let ctx = ctx.with_container(container.as_str());

        let declared = self
            .manifest
            .declared_image_reference(service)
            .await
            .map_err(|err| UpdateError::stage(service, Stage::ResolveImageReference, err))?;

        let descriptor = match self.cache.container_descriptor(&container).await {
            Ok(descriptor) => descriptor,
            Err(err) if err.is_not_found() => {
                dcu_debug!(context = ctx, "container disappeared before inspection");
                return Ok(StalenessVerdict::NotRunning);
            }
            Err(err) => return Err(UpdateError::stage(service, Stage::InspectContainer, err)),
        };
        // Read off the container: the declared reference may already point elsewhere.
        let current = match descriptor.image {
            Some(identity) => Some(
                self.cache
                    .image_identity(&identity)
                    .await
                    .map_err(|err| UpdateError::stage(service, Stage::ListImages, err))?
                    .unwrap_or(identity),
            ),
            None => None,
        };

        self.runtime
            .pull(service, &declared)
            .await
            .map_err(|err| UpdateError::stage(service, Stage::Pull, err))?;
        self.cache.invalidate_images().await;

        let target = self
            .cache
            .image_identity(&declared)
            .await
            .map_err(|err| UpdateError::stage(service, Stage::ListImages, err))?;

        let verdict = StalenessVerdict::compare(current, target);
        dcu_debug!(context = ctx, "resolved {declared}: {verdict}");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcu_runtime::RuntimeError;
    use dcu_testharness::{FakeRuntime, Operation};

    fn resolver_over(fake: &Arc<FakeRuntime>) -> StalenessResolver {
        let cache = Arc::new(IdentityCache::new(fake.clone()));
        StalenessResolver::new(fake.clone(), fake.clone(), cache)
    }

    fn id(raw: &str) -> ImageIdentity {
        ImageIdentity::parse(raw).expect("identity")
    }

    #[test]
    fn compare_never_marks_missing_identities_stale() {
        assert_eq!(
            StalenessVerdict::compare(Some(id("abc")), None),
            StalenessVerdict::UpToDate
        );
        assert_eq!(
            StalenessVerdict::compare(None, Some(id("abc"))),
            StalenessVerdict::UpToDate
        );
        assert_eq!(StalenessVerdict::compare(None, None), StalenessVerdict::UpToDate);
        assert_eq!(
            StalenessVerdict::compare(Some(id("abc")), Some(id("sha256:abc"))),
            StalenessVerdict::UpToDate
        );
        assert!(StalenessVerdict::compare(Some(id("abc")), Some(id("def"))).is_stale());
    }

    #[tokio::test]
    async fn newly_published_image_is_stale() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123")
            .publish("myapp/web:latest", "def456");
        let verdict = resolver_over(&fake)
            .resolve(&ServiceName::from("web"))
            .await
            .expect("resolve");
        assert_eq!(
            verdict,
            StalenessVerdict::Stale {
                current: id("abc123"),
                target: id("def456"),
            }
        );
    }

    #[tokio::test]
    async fn unchanged_image_is_up_to_date() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123");
        let verdict = resolver_over(&fake)
            .resolve(&ServiceName::from("web"))
            .await
            .expect("resolve");
        assert_eq!(verdict, StalenessVerdict::UpToDate);
        assert_eq!(fake.count(Operation::Pull), 1);
    }

    #[tokio::test]
    async fn stopped_service_is_not_running_and_not_pulled() {
        let fake = Arc::new(FakeRuntime::new());
        fake.declare("db", "postgres:16")
            .publish("postgres:16", "0ff1ce");
        let verdict = resolver_over(&fake)
            .resolve(&ServiceName::from("db"))
            .await
            .expect("resolve");
        assert_eq!(verdict, StalenessVerdict::NotRunning);
        assert_eq!(fake.count(Operation::Pull), 0);
    }

    #[tokio::test]
    async fn vanished_container_is_not_running() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123");
        fake.forget_container("web");
        let verdict = resolver_over(&fake)
            .resolve(&ServiceName::from("web"))
            .await
            .expect("resolve");
        assert_eq!(verdict, StalenessVerdict::NotRunning);
    }

    #[tokio::test]
    async fn unresolvable_target_is_up_to_date() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123");
        fake.untag("myapp/web:latest");
        let verdict = resolver_over(&fake)
            .resolve(&ServiceName::from("web"))
            .await
            .expect("resolve");
        assert_eq!(verdict, StalenessVerdict::UpToDate);
    }

    #[tokio::test]
    async fn pull_failure_aborts_with_pull_stage() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123").fail(
            Operation::Pull,
            Some("web"),
            RuntimeError::CommandFailed {
                command: "docker compose pull web".into(),
                status: "exit code 18".into(),
                stderr: "manifest unknown".into(),
            },
        );
        let err = resolver_over(&fake)
            .resolve(&ServiceName::from("web"))
            .await
            .expect_err("pull fails");
        assert!(matches!(
            err,
            UpdateError::Stage {
                stage: Stage::Pull,
                ..
            }
        ));
        assert_eq!(fake.count(Operation::Stop), 0);
    }

    #[tokio::test]
    async fn target_lookup_happens_after_invalidation() {
        let fake = Arc::new(FakeRuntime::new());
        fake.run("web", "myapp/web:latest", "abc123")
            .publish("myapp/web:latest", "def456");
        let resolver = resolver_over(&fake);
        resolver
            .resolve(&ServiceName::from("web"))
            .await
            .expect("resolve");
        let web_ops: Vec<_> = fake
            .journal()
            .into_iter()
            .map(|call| call.operation)
            .filter(|op| matches!(op, Operation::Pull | Operation::ListImages))
            .collect();
        assert_eq!(
            web_ops,
            vec![Operation::ListImages, Operation::Pull, Operation::ListImages]
        );
    }
}
