//! Streaming supervision for kubeat
//!
//! This crate decides which pods should currently be tailed, runs the per-pod
//! streaming workers, and keeps the watcher registry in sync with the cluster
//! through periodic reconciliation or a live pod watch.

mod ignore;
mod registry;
mod supervisor;
mod worker;

pub use ignore::{DISABLE_ANNOTATION, IgnoreRules};
pub use registry::{Watcher, WatcherRegistry};
pub use supervisor::{Discovery, LogsMethod, PodSupervisor};

// Re-export types that are used in our public API
pub use kubeat_types::{PodIdentity, PodState, PodStatus};
