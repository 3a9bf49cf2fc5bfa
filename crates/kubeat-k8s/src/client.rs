//! Cluster bootstrap and pod listing

use std::path::Path;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use tracing::info;

use kubeat_types::{PodState, PodStatus};

/// Mounted by Kubernetes into every pod that runs with a service account
const NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Server-side timeout for pod list requests
const LIST_TIMEOUT_SECS: u32 = 10;

/// True when running inside a cluster
pub fn is_in_cluster() -> bool {
    std::env::var("KUBERNETES_SERVICE_HOST").is_ok_and(|v| !v.is_empty())
}

/// Namespace from the service-account mount, if present
pub fn service_account_namespace() -> Option<String> {
    let data = std::fs::read_to_string(NAMESPACE_PATH).ok()?;
    let namespace = data.trim();
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_string())
    }
}

/// Build a client from in-cluster credentials or a kubeconfig file
pub async fn connect(kubeconfig: Option<&Path>, skip_tls_verify: bool) -> Result<Client> {
    let mut config = if is_in_cluster() {
        info!("in-cluster launch detected");
        kube::Config::incluster().context("failed to load in-cluster config")?
    } else {
        info!("outside-cluster launch detected");
        let kubeconfig = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig at {}", path.display()))?,
            None => Kubeconfig::read().context("failed to read kubeconfig")?,
        };
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("failed to build config from kubeconfig")?
    };

    if skip_tls_verify {
        config.accept_invalid_certs = true;
    }

    Client::try_from(config).context("failed to create Kubernetes client")
}

/// List pods in the namespace, reduced to the supervisor's view
pub async fn list_pods(api: &Api<Pod>) -> Result<Vec<PodState>> {
    let params = ListParams::default().timeout(LIST_TIMEOUT_SECS);
    let list = api.list(&params).await.context("failed to list pods")?;
    Ok(list.items.iter().map(pod_state).collect())
}

/// Reduce a full pod object to the fields reconciliation cares about
pub fn pod_state(pod: &Pod) -> PodState {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let status = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodStatus::from)
        .unwrap_or(PodStatus::Unknown);

    let mut state = PodState::new(name, status);
    if let Some(annotations) = &pod.metadata.annotations {
        state.annotations = annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    state
}
