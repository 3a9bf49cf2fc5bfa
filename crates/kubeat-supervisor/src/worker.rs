use std::sync::Arc;

use futures::{AsyncBufRead, AsyncBufReadExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kubeat_sender::Sender;
use kubeat_types::PodIdentity;

use crate::registry::WatcherRegistry;

/// Matches the Kubernetes 400 body for log requests against multi-container
/// pods; the capture holds the whitespace-separated container list.
const CONTAINERS_ERROR_RE: &str = r".*choose one of: \[(.*)\] .*";

/// Historical lines requested when a stream opens
pub(crate) const TAIL_LINES: i64 = 10;

/// Everything a streaming worker needs, cheap to clone per task
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub api: Api<Pod>,
    pub namespace: String,
    pub registry: Arc<WatcherRegistry>,
    pub sender: Arc<Sender>,
}

/// One log stream for a pod; fans out per container when the API reports the
/// ambiguous-container error
pub(crate) async fn run_worker(ctx: WorkerContext, ident: PodIdentity, token: CancellationToken) {
    let Some(message) = stream_pod_logs(&ctx, &ident, &token).await else {
        return;
    };

    if message.contains("ContainerCreating") {
        info!(stream = %ident, "container still creating, retrying on next tick");
        ctx.registry.remove(&ident.key());
        return;
    }

    let containers = ambiguous_containers(&message);
    if containers.is_empty() {
        warn!(stream = %ident, status = %message, "log stream rejected");
        ctx.registry.remove(&ident.key());
        return;
    }

    // One worker per container. The children's tokens chain off this watcher
    // so a pod-level stop reaches them, and the pod-level entry stays so
    // reconciliation keeps treating the pod as covered.
    for container in containers {
        let child = PodIdentity::with_container(&ident.pod, &container);
        let child_token = ctx.registry.adopt(&child.key(), &ident.pod, &token);
        let child_ctx = ctx.clone();
        tokio::spawn(async move {
            if stream_pod_logs(&child_ctx, &child, &child_token).await.is_some() {
                shutdown(&child_ctx.registry, &child);
            }
        });
    }
}

/// Open the follow stream and pump it until stop, EOF, or error
///
/// Returns the status message when the request was rejected with a 400 so the
/// caller can decide between retry and fan-out; every other outcome has
/// already updated the registry by the time this returns.
async fn stream_pod_logs(
    ctx: &WorkerContext,
    ident: &PodIdentity,
    token: &CancellationToken,
) -> Option<String> {
    info!(stream = %ident, "starting log worker");

    let params = LogParams {
        follow: true,
        tail_lines: Some(TAIL_LINES),
        container: ident.container.clone(),
        ..Default::default()
    };

    match ctx.api.log_stream(&ident.pod, &params).await {
        Ok(reader) => {
            pump_lines(reader, ident, &ctx.namespace, &ctx.sender, token).await;
            shutdown(&ctx.registry, ident);
            None
        }
        Err(kube::Error::Api(response)) if response.code == 400 => Some(response.message),
        Err(err) => {
            error!(stream = %ident, error = %err, "failed to open log stream");
            ctx.registry.remove(&ident.key());
            None
        }
    }
}

/// Read the stream split on `\n`, forwarding each non-empty line to the
/// dispatcher with the delimiter kept; a zero-length read is end of stream
pub(crate) async fn pump_lines<R>(
    mut reader: R,
    ident: &PodIdentity,
    namespace: &str,
    sender: &Sender,
    token: &CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(stream = %ident, "stopping log worker");
                return;
            }
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    info!(stream = %ident, "log stream ended");
                    return;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    sender
                        .send(namespace, &ident.pod, &line, ident.container.as_deref())
                        .await;
                    buf.clear();
                }
                Err(err) => {
                    error!(stream = %ident, error = %err, "log stream read failed");
                    return;
                }
            }
        }
    }
}

/// Full shutdown: drop both the pod-level and the container-level entries and
/// signal whichever still exists
pub(crate) fn shutdown(registry: &WatcherRegistry, ident: &PodIdentity) {
    registry.stop(&ident.key());
    if ident.container.is_some() {
        registry.stop(&ident.pod);
    }
}

/// Parse the container list out of the ambiguous-container message
pub(crate) fn ambiguous_containers(message: &str) -> Vec<String> {
    let Ok(re) = Regex::new(CONTAINERS_ERROR_RE) else {
        return Vec::new();
    };
    let Some(captures) = re.captures(message) else {
        return Vec::new();
    };
    captures
        .get(1)
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
