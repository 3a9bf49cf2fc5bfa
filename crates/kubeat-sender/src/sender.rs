use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use kubeat_types::LogMessage;

use crate::batch::Batch;
use crate::config::SenderConfig;
use crate::sink::{self, SenderError, SinkClient};

/// Upper bound on shipping latency regardless of volume
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the batch buffer and the sink connection; the only writer toward the
/// sink, so at most one push is in flight at any time
pub struct Sender {
    batch: Batch,
    sink: Mutex<Box<dyn SinkClient>>,
    limit: usize,
    flush_interval: Duration,
}

impl Sender {
    /// Connect the configured sink and build a dispatcher around it
    pub async fn connect(config: &SenderConfig) -> Result<Self, SenderError> {
        let client = sink::connect(config).await?;
        Ok(Self::with_client(client, config.limit))
    }

    /// Build a dispatcher around an already-connected sink
    pub fn with_client(client: Box<dyn SinkClient>, limit: usize) -> Self {
        Self {
            batch: Batch::new(),
            sink: Mutex::new(client),
            limit,
            flush_interval: FLUSH_INTERVAL,
        }
    }

    /// Number of messages waiting for the next flush
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Queue one log line; flushes inline once the batch limit is reached
    pub async fn send(&self, namespace: &str, pod: &str, line: &str, container: Option<&str>) {
        self.batch.add(LogMessage::new(namespace, pod, line, container));
        if self.batch.len() >= self.limit {
            if let Err(err) = self.flush().await {
                warn!(error = %err, "flush failed, batch retained for retry");
            }
        }
    }

    /// Push the current batch contents, dropping them only on success
    ///
    /// The sink lock is held across snapshot, push, and clean, which keeps
    /// concurrent size-triggered and timer-triggered flushes from delivering
    /// the same messages twice.
    pub async fn flush(&self) -> Result<(), SenderError> {
        let sink = self.sink.lock().await;
        let snapshot = self.batch.snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }
        sink.push(&snapshot).await?;
        self.batch.clean(snapshot.keys());
        Ok(())
    }

    /// Fixed-period flush loop; runs a final flush on shutdown
    pub async fn run_ticker(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(err) = self.flush().await {
                        error!(error = %err, "final flush failed");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        error!(error = %err, "periodic flush failed, batch retained for retry");
                    }
                }
            }
        }
    }
}
