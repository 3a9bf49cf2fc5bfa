//! Shared types for kubeat
//!
//! This crate contains data structures used across multiple kubeat crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Pod lifecycle phase as reported by the API server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodStatus {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// The supervisor's view of a pod: just enough to decide whether to tail it
#[derive(Clone, Debug)]
pub struct PodState {
    pub name: String,
    pub status: PodStatus,
    pub annotations: HashMap<String, String>,
}

impl PodState {
    pub fn new(name: impl Into<String>, status: PodStatus) -> Self {
        Self {
            name: name.into(),
            status,
            annotations: HashMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == PodStatus::Running
    }
}

/// Identity of one log stream
///
/// Single-container pods are keyed by pod name alone; fan-out children of a
/// multi-container pod are keyed by `pod-container`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodIdentity {
    pub pod: String,
    pub container: Option<String>,
}

impl PodIdentity {
    pub fn pod(pod: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: None,
        }
    }

    pub fn with_container(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: Some(container.into()),
        }
    }

    /// Registry key for this stream
    pub fn key(&self) -> String {
        match &self.container {
            Some(container) => format!("{}-{}", self.pod, container),
            None => self.pod.clone(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}/{}", self.pod, container),
            None => f.write_str(&self.pod),
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// A single log line as shipped to a sink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub pod_name: String,
    pub namespace: String,
    pub container: String,
    pub message: String,
    pub sender_time: DateTime<Utc>,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl LogMessage {
    /// Stamp a raw line with its origin and the current time
    pub fn new(namespace: &str, pod: &str, message: &str, container: Option<&str>) -> Self {
        Self {
            pod_name: pod.to_string(),
            namespace: namespace.to_string(),
            container: container.unwrap_or_default().to_string(),
            message: message.to_string(),
            sender_time: Utc::now(),
            meta: HashMap::new(),
        }
    }
}
