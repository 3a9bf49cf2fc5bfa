//! Kubernetes client bootstrap for kubeat
//!
//! This crate selects between in-cluster credentials and a kubeconfig file,
//! discovers the namespace from the service-account mount, and reduces pod
//! objects to the fields the supervisor cares about.

mod client;

pub use client::{connect, is_in_cluster, list_pods, pod_state, service_account_namespace};

// Re-export types that are used in our public API
pub use kubeat_types::{PodState, PodStatus};
