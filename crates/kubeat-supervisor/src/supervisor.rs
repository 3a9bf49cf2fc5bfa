use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{LogParams, WatchParams};
use kube::core::WatchEvent;
use kube::{Api, Client};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kubeat_k8s::{list_pods, pod_state};
use kubeat_sender::Sender;
use kubeat_types::{PodIdentity, PodState};

use crate::ignore::IgnoreRules;
use crate::registry::WatcherRegistry;
use crate::worker::{self, WorkerContext};

/// How many per-pod fetches run at once in tail mode
const MAX_PARALLEL_FETCHES: usize = 15;

/// Upper bound for the watch reconnect backoff
const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(30);

/// How logs are acquired: long-lived follow streams or per-tick fetches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogsMethod {
    #[default]
    Follow,
    Tail,
}

/// How pods are discovered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Discovery {
    #[default]
    Periodic,
    Watch,
}

/// Compares the observed pod set against the watcher registry and starts or
/// stops streaming workers to close the gap
pub struct PodSupervisor {
    api: Api<Pod>,
    namespace: String,
    registry: Arc<WatcherRegistry>,
    sender: Arc<Sender>,
    ignore: IgnoreRules,
    tick: Duration,
    discovery: Discovery,
    method: LogsMethod,
    since: Mutex<Option<DateTime<Utc>>>,
}

impl PodSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        namespace: &str,
        registry: Arc<WatcherRegistry>,
        sender: Arc<Sender>,
        ignore: IgnoreRules,
        tick: Duration,
        discovery: Discovery,
        method: LogsMethod,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            registry,
            sender,
            ignore,
            tick,
            discovery,
            method,
            since: Mutex::new(None),
        }
    }

    /// Run discovery until shutdown; also owns the dispatcher's flush ticker
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tokio::spawn(
            Arc::clone(&self.sender).run_ticker(shutdown.child_token()),
        );

        match self.discovery {
            Discovery::Periodic => self.run_periodic(shutdown).await,
            Discovery::Watch => self.run_watch(shutdown).await,
        }
    }

    async fn run_periodic(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.registry.stop_all();
                    return;
                }
                _ = ticker.tick() => self.tick_once().await,
            }
        }
    }

    /// One reconciliation pass: list pods, diff against the registry, act
    async fn tick_once(&self) {
        let pods = match list_pods(&self.api).await {
            Ok(pods) => pods,
            Err(err) => {
                error!(error = %err, "pod list failed, retrying next tick");
                return;
            }
        };
        debug!(count = pods.len(), "listed pods");

        let plan = plan(&self.registry, &pods, &self.ignore);
        for name in &plan.stop {
            info!(pod = %name, "stopping log worker, pod gone or ignored");
            self.registry.stop(name);
        }

        match self.method {
            LogsMethod::Follow => {
                for name in &plan.start {
                    self.start_worker(PodIdentity::pod(name));
                }
            }
            LogsMethod::Tail => {
                for name in &plan.start {
                    self.registry.put(name);
                }
                let since = *self.since.lock();
                let targets: Vec<&PodState> = pods
                    .iter()
                    .filter(|p| p.is_running() && !self.ignore.is_ignored(&p.name, &p.annotations))
                    .collect();
                self.fetch_in_waves(&targets, since).await;
            }
        }

        *self.since.lock() = Some(Utc::now());
    }

    fn start_worker(&self, ident: PodIdentity) {
        info!(pod = %ident, "pod is running, starting log worker");
        let token = self.registry.put(&ident.key());
        let ctx = WorkerContext {
            api: self.api.clone(),
            namespace: self.namespace.clone(),
            registry: Arc::clone(&self.registry),
            sender: Arc::clone(&self.sender),
        };
        tokio::spawn(worker::run_worker(ctx, ident, token));
    }

    /// Consume pod watch events, reopening the stream with backoff when the
    /// server closes it
    async fn run_watch(&self, shutdown: CancellationToken) {
        // one reconcile up front so pods that predate the watch are covered
        self.tick_once().await;

        let params = WatchParams::default();
        let mut backoff = Duration::from_secs(1);
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.api.watch(&params, "0") => match result {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(error = %err, "pod watch failed, reconnecting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
                        continue;
                    }
                }
            };
            let mut stream = stream.boxed();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.registry.stop_all();
                        return;
                    }
                    event = stream.try_next() => match event {
                        Ok(Some(event)) => {
                            backoff = Duration::from_secs(1);
                            self.handle_event(event);
                        }
                        Ok(None) => {
                            warn!("watch stream closed, reconnecting");
                            break;
                        }
                        Err(err) => {
                            error!(error = %err, "watch stream failed, reconnecting");
                            break;
                        }
                    }
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
        }
        self.registry.stop_all();
    }

    fn handle_event(&self, event: WatchEvent<Pod>) {
        match event {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) => {
                let state = pod_state(&pod);
                let watched = self.registry.contains(&state.name);
                let wanted =
                    state.is_running() && !self.ignore.is_ignored(&state.name, &state.annotations);
                if wanted && !watched {
                    self.start_worker(PodIdentity::pod(&state.name));
                } else if watched && !state.is_running() {
                    info!(pod = %state.name, "pod left running state, stopping log worker");
                    self.registry.stop(&state.name);
                }
            }
            WatchEvent::Deleted(pod) => {
                let name = pod.metadata.name.unwrap_or_default();
                if self.registry.contains(&name) {
                    info!(pod = %name, "pod deleted, stopping log worker");
                    self.registry.stop(&name);
                }
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(err) => {
                warn!(code = err.code, reason = %err.message, "watch error event");
            }
        }
    }

    /// Tail mode: bounded waves of one-shot log fetches, each wave completing
    /// before the next starts
    async fn fetch_in_waves(&self, targets: &[&PodState], since: Option<DateTime<Utc>>) {
        for wave in targets.chunks(MAX_PARALLEL_FETCHES) {
            let fetches = wave.iter().map(|pod| self.fetch_pod(&pod.name, since));
            futures::future::join_all(fetches).await;
        }
    }

    /// Fetch one pod's lines since the last tick, fanning out per container
    /// when the API reports the ambiguous-container error
    async fn fetch_pod(&self, pod: &str, since: Option<DateTime<Utc>>) {
        match self.fetch_logs(pod, None, since).await {
            Ok(()) => self.registry.touch(pod),
            Err(kube::Error::Api(response)) if response.code == 400 => {
                if response.message.contains("ContainerCreating") {
                    debug!(pod, "container still creating, skipping fetch");
                    return;
                }
                for container in worker::ambiguous_containers(&response.message) {
                    if let Err(err) = self.fetch_logs(pod, Some(&container), since).await {
                        error!(pod, container = %container, error = %err, "container log fetch failed");
                    }
                }
                self.registry.touch(pod);
            }
            Err(err) => error!(pod, error = %err, "log fetch failed"),
        }
    }

    async fn fetch_logs(
        &self,
        pod: &str,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), kube::Error> {
        let params = LogParams {
            container: container.map(str::to_string),
            since_time: since,
            tail_lines: if since.is_none() {
                Some(worker::TAIL_LINES)
            } else {
                None
            },
            ..Default::default()
        };

        let text = self.api.logs(pod, &params).await?;
        for line in text.split_inclusive('\n') {
            self.sender.send(&self.namespace, pod, line, container).await;
        }
        Ok(())
    }
}

/// Start/stop decisions for one reconciliation pass
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ReconcilePlan {
    pub start: Vec<String>,
    pub stop: Vec<String>,
}

/// Pure diff of desired state (listed pods) against actual state (registry)
pub(crate) fn plan(
    registry: &WatcherRegistry,
    pods: &[PodState],
    ignore: &IgnoreRules,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    for pod in pods {
        let wanted = pod.is_running() && !ignore.is_ignored(&pod.name, &pod.annotations);
        let watched = registry.contains(&pod.name);
        if wanted && !watched {
            plan.start.push(pod.name.clone());
        } else if !wanted && watched {
            plan.stop.push(pod.name.clone());
        }
    }

    // Pod-level watchers whose pod no longer appears in the listing at all.
    // Container-level children are excluded here; stopping the pod-level
    // entry cascades to them through their chained tokens.
    let listed: HashSet<&str> = pods.iter().map(|pod| pod.name.as_str()).collect();
    for key in registry.pod_level_keys() {
        if !listed.contains(key.as_str()) {
            plan.stop.push(key);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeat_types::PodStatus;
    use std::collections::HashMap;

    fn running(name: &str) -> PodState {
        PodState::new(name, PodStatus::Running)
    }

    fn pending(name: &str) -> PodState {
        PodState::new(name, PodStatus::Pending)
    }

    fn disabled(name: &str) -> PodState {
        let mut state = running(name);
        state
            .annotations
            .insert(crate::ignore::DISABLE_ANNOTATION.to_string(), "yes".to_string());
        state
    }

    fn apply(registry: &WatcherRegistry, plan: &ReconcilePlan) {
        for name in &plan.stop {
            registry.stop(name);
        }
        for name in &plan.start {
            registry.put(name);
        }
    }

    #[test]
    fn starts_only_running_unignored_pods() {
        let registry = WatcherRegistry::new();
        let ignore = IgnoreRules::parse("^kubeat-.*").unwrap();
        let pods = vec![
            running("web-1"),
            pending("web-2"),
            running("kubeat-7f9c"),
            disabled("noisy-1"),
        ];

        let plan = plan(&registry, &pods, &ignore);
        assert_eq!(plan.start, vec!["web-1"]);
        assert!(plan.stop.is_empty());
    }

    #[test]
    fn stops_pods_that_left_running_or_became_ignored() {
        let registry = WatcherRegistry::new();
        registry.put("web-1");
        registry.put("noisy-1");
        let ignore = IgnoreRules::parse("").unwrap();

        let plan = plan(
            &registry,
            &[pending("web-1"), disabled("noisy-1")],
            &ignore,
        );
        assert!(plan.start.is_empty());
        let mut stops = plan.stop.clone();
        stops.sort();
        assert_eq!(stops, vec!["noisy-1", "web-1"]);
    }

    #[test]
    fn stops_watchers_for_vanished_pods_but_keeps_children() {
        let registry = WatcherRegistry::new();
        let parent = registry.put("db-0");
        registry.adopt("db-0-main", "db-0", &parent);
        registry.put("gone-1");
        let ignore = IgnoreRules::parse("").unwrap();

        let plan = plan(&registry, &[running("db-0")], &ignore);
        assert!(plan.start.is_empty());
        assert_eq!(plan.stop, vec!["gone-1"]);
    }

    #[test]
    fn vanished_pod_is_stopped_despite_a_prefix_colliding_neighbor() {
        let registry = WatcherRegistry::new();
        registry.put("api");
        let parent = registry.put("api-gateway-0");
        let child = registry.adopt("api-gateway-0-main", "api-gateway-0", &parent);
        let ignore = IgnoreRules::parse("").unwrap();

        // api-gateway-0 vanishes from the listing while api is still listed;
        // its name extending "api" must not shield its own watcher
        let plan = plan(&registry, &[running("api")], &ignore);
        assert_eq!(plan.stop, vec!["api-gateway-0"]);

        apply(&registry, &plan);
        assert!(child.is_cancelled());
        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["api", "api-gateway-0-main"]);
    }

    #[test]
    fn repeated_reconciles_converge_to_the_desired_set() {
        let registry = WatcherRegistry::new();
        let ignore = IgnoreRules::parse("").unwrap();

        let pods = vec![running("web-1"), running("web-2"), pending("db-0")];
        apply(&registry, &plan(&registry, &pods, &ignore));
        assert_eq!(registry.count(), 2);

        // a second pass with the same input changes nothing
        let second = plan(&registry, &pods, &ignore);
        assert_eq!(second, ReconcilePlan::default());

        // web-2 terminates, db-0 starts running
        let pods = vec![running("web-1"), pending("web-2"), running("db-0")];
        apply(&registry, &plan(&registry, &pods, &ignore));

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["db-0", "web-1"]);
    }

    #[test]
    fn newly_annotated_pod_is_stopped_on_the_next_pass() {
        let registry = WatcherRegistry::new();
        let ignore = IgnoreRules::parse("").unwrap();

        apply(&registry, &plan(&registry, &[running("noisy-1")], &ignore));
        let token = registry.get("noisy-1").map(|w| w.token);
        assert!(token.is_some());

        apply(&registry, &plan(&registry, &[disabled("noisy-1")], &ignore));
        assert_eq!(registry.count(), 0);
        assert!(token.is_some_and(|t| t.is_cancelled()));
    }

    #[test]
    fn ignore_is_a_pure_predicate() {
        let ignore = IgnoreRules::parse("^db-.*").unwrap();
        let annotations = HashMap::new();
        let first = ignore.is_ignored("db-0", &annotations);
        let second = ignore.is_ignored("db-0", &annotations);
        assert!(first && second);
        assert!(!ignore.is_ignored("web-1", &annotations));
    }
}
