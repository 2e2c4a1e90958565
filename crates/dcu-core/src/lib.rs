//! ---
//! dcu_section: "01-core-functionality"
//! dcu_subsection: "module"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Staleness detection and bounded-concurrency update orchestration."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
//! Core of dc-update: decides which services run outdated images and replaces
//! their containers, a bounded number of services at a time.
//!
//! [`Updater::run_update`] is the entry point. Per service it runs an
//! [`UpdateOrchestrator`] which validates the name, asks the
//! [`StalenessResolver`] for a verdict and, for stale services, performs the
//! [`RestartTransition`].

pub mod cache;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod restart;
pub mod scheduler;

pub use cache::IdentityCache;
pub use error::{Stage, UpdateError};
pub use metrics::{new_registry, SharedRegistry, UpdateMetrics};
pub use orchestrator::{UpdateOrchestrator, UpdatePhase};
pub use report::{RunReport, UpdateAction, UpdateOutcome};
pub use resolver::{StalenessResolver, StalenessVerdict};
pub use restart::{RestartStep, RestartTransition};
pub use scheduler::{UpdateObserver, Updater, DEFAULT_CONCURRENCY_CEILING};
