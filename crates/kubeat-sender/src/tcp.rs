use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::info;

use kubeat_types::LogMessage;

use crate::config::SenderConfig;
use crate::sink::{SenderError, SinkClient};

/// Newline-delimited JSON over a single TCP connection
pub struct TcpClient {
    conn: Mutex<TcpStream>,
}

impl TcpClient {
    /// Dial the first configured host once
    pub async fn connect(config: &SenderConfig) -> Result<Self, SenderError> {
        let host = config
            .hosts
            .first()
            .ok_or_else(|| SenderError::Config("tcp sink needs at least one host".to_string()))?;
        let conn = TcpStream::connect(host.as_str()).await?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl SinkClient for TcpClient {
    async fn push(&self, batch: &BTreeMap<i64, LogMessage>) -> Result<(), SenderError> {
        info!(count = batch.len(), "writing messages to tcp sink");
        let mut conn = self.conn.lock().await;
        for msg in batch.values() {
            let mut data = serde_json::to_vec(msg)?;
            data.push(b'\n');
            conn.write_all(&data).await?;
        }
        conn.flush().await?;
        Ok(())
    }
}
