use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use kubeat_types::LogMessage;

use crate::config::{SenderConfig, SinkType};
use crate::elastic::ElasticClient;
use crate::tcp::TcpClient;

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("invalid sender config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Downstream consumer of batches
#[async_trait]
pub trait SinkClient: Send + Sync {
    /// Deliver the whole batch; an error means none of it may be dropped
    async fn push(&self, batch: &BTreeMap<i64, LogMessage>) -> Result<(), SenderError>;
}

/// Establish the configured sink's persistent connection
pub async fn connect(config: &SenderConfig) -> Result<Box<dyn SinkClient>, SenderError> {
    match config.sink {
        SinkType::Elasticsearch => Ok(Box::new(ElasticClient::connect(config)?)),
        SinkType::Tcp => Ok(Box::new(TcpClient::connect(config).await?)),
    }
}
