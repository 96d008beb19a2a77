pub mod discovery;
pub mod lifecycle;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod fixtures;

pub use discovery::{DiscoveryConfig, DiscoveryService};
pub use lifecycle::{LifecycleService, TransitionOutcome, TransitionReceipt};
pub use snapshot::SuppressionScope;
