use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Supervisor-side record of one live log-streaming worker
#[derive(Clone)]
pub struct Watcher {
    pub key: String,
    pub token: CancellationToken,
    /// Pod-level key this entry fans out from, for container-level children
    pub parent: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Indexed set of active watchers, one per stream identity
///
/// Per-key operations are atomic, which is what keeps the at-most-one-worker
/// invariant under concurrent signals from the two discovery sources.
#[derive(Default)]
pub struct WatcherRegistry {
    inner: DashMap<String, Watcher>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher under `key`, displacing (and stopping) any previous
    /// entry. Returns the new watcher's stop token.
    pub fn put(&self, key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.insert(key, token.clone(), None);
        token
    }

    /// Register a fan-out child under its parent's key, with a token chained
    /// off `parent` so stopping the pod-level watcher stops the child too
    pub fn adopt(
        &self,
        key: &str,
        parent_key: &str,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        self.insert(key, token.clone(), Some(parent_key.to_string()));
        token
    }

    fn insert(&self, key: &str, token: CancellationToken, parent: Option<String>) {
        let watcher = Watcher {
            key: key.to_string(),
            token,
            parent,
            updated_at: None,
        };
        if let Some(old) = self.inner.insert(key.to_string(), watcher) {
            old.token.cancel();
        }
    }

    pub fn get(&self, key: &str) -> Option<Watcher> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Remove without signaling; workers call this on their own way out
    pub fn remove(&self, key: &str) -> Option<Watcher> {
        self.inner.remove(key).map(|(_, watcher)| watcher)
    }

    /// Remove the watcher and signal its stop token. Removing first makes the
    /// signal at-most-once under concurrent stop requests.
    pub fn stop(&self, key: &str) -> bool {
        match self.remove(key) {
            Some(watcher) => {
                watcher.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Record a completed fetch; the tail variant uses this per tick
    pub fn touch(&self, key: &str) {
        if let Some(mut watcher) = self.inner.get_mut(key) {
            watcher.updated_at = Some(Utc::now());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keys of pod-level entries only; fan-out children are excluded since
    /// their pod-level entry decides their fate
    pub fn pod_level_keys(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|entry| entry.parent.is_none())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Stop every registered watcher; used on process shutdown
    pub fn stop_all(&self) {
        for key in self.keys() {
            self.stop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_and_stops_the_old_watcher() {
        let registry = WatcherRegistry::new();
        let first = registry.put("web-1");
        let second = registry.put("web-1");

        assert_eq!(registry.count(), 1);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn stop_removes_and_signals_once() {
        let registry = WatcherRegistry::new();
        let token = registry.put("web-1");

        assert!(registry.stop("web-1"));
        assert!(token.is_cancelled());
        assert_eq!(registry.count(), 0);

        // second stop finds nothing to signal
        assert!(!registry.stop("web-1"));
    }

    #[test]
    fn remove_does_not_signal() {
        let registry = WatcherRegistry::new();
        let token = registry.put("web-1");

        registry.remove("web-1");
        assert!(!token.is_cancelled());
    }

    #[test]
    fn adopted_children_follow_the_parent() {
        let registry = WatcherRegistry::new();
        let parent = registry.put("db-0");
        let child = registry.adopt("db-0-sidecar", "db-0", &parent);

        assert_eq!(registry.count(), 2);
        registry.stop("db-0");
        assert!(child.is_cancelled());
    }

    #[test]
    fn pod_level_keys_exclude_children() {
        let registry = WatcherRegistry::new();
        let parent = registry.put("db-0");
        registry.adopt("db-0-sidecar", "db-0", &parent);

        assert_eq!(registry.pod_level_keys(), vec!["db-0"]);
        assert_eq!(
            registry.get("db-0-sidecar").and_then(|w| w.parent),
            Some("db-0".to_string())
        );
    }

    #[test]
    fn touch_records_a_fetch_time() {
        let registry = WatcherRegistry::new();
        registry.put("web-1");
        assert!(registry.get("web-1").and_then(|w| w.updated_at).is_none());

        registry.touch("web-1");
        assert!(registry.get("web-1").and_then(|w| w.updated_at).is_some());
    }
}
