use std::collections::BTreeMap;

use parking_lot::Mutex;

use kubeat_types::LogMessage;

/// In-memory buffer of log messages awaiting a push
///
/// Keys are wall-clock nanoseconds made strictly monotonic under the lock, so
/// two messages accepted in the same nanosecond never collide.
pub struct Batch {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: BTreeMap<i64, LogMessage>,
    last_key: i64,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                last_key: 0,
            }),
        }
    }

    /// Insert a message under a fresh unique key
    pub fn add(&self, msg: LogMessage) {
        let nanos = msg.sender_time.timestamp_nanos_opt().unwrap_or_default();
        let mut inner = self.inner.lock();
        let key = if nanos > inner.last_key {
            nanos
        } else {
            inner.last_key + 1
        };
        inner.last_key = key;
        inner.entries.insert(key, msg);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Independent copy of the current contents, so the live buffer keeps
    /// accepting lines while a push is in flight
    pub fn snapshot(&self) -> BTreeMap<i64, LogMessage> {
        self.inner.lock().entries.clone()
    }

    /// Drop the given keys after a successful push; lines accepted since the
    /// snapshot was taken stay in the buffer
    pub fn clean<'a>(&self, keys: impl IntoIterator<Item = &'a i64>) {
        let mut inner = self.inner.lock();
        for key in keys {
            inner.entries.remove(key);
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> LogMessage {
        LogMessage::new("default", "web-1", text, None)
    }

    #[test]
    fn keys_are_unique_under_bursts() {
        let batch = Batch::new();
        for i in 0..1000 {
            batch.add(msg(&format!("line {i}")));
        }
        assert_eq!(batch.len(), 1000);
    }

    #[test]
    fn same_timestamp_does_not_collide() {
        let batch = Batch::new();
        let first = msg("a");
        let mut second = msg("b");
        second.sender_time = first.sender_time;

        batch.add(first);
        batch.add(second);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn snapshot_is_independent() {
        let batch = Batch::new();
        batch.add(msg("a"));

        let snapshot = batch.snapshot();
        batch.add(msg("b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn clean_drops_only_snapshotted_keys() {
        let batch = Batch::new();
        batch.add(msg("a"));
        batch.add(msg("b"));

        let snapshot = batch.snapshot();
        batch.add(msg("c"));
        batch.clean(snapshot.keys());

        assert_eq!(batch.len(), 1);
        let survivor = batch.snapshot();
        assert_eq!(survivor.values().next().map(|m| m.message.as_str()), Some("c"));
    }
}
