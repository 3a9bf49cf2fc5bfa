//! Log batching and delivery for kubeat
//!
//! This crate provides the bounded batch buffer, the dispatcher that flushes
//! it on size or time, and the sink clients batches are pushed to.

mod batch;
mod config;
mod elastic;
mod sender;
mod sink;
mod tcp;

pub use batch::Batch;
pub use config::{ELASTIC_ENV_PASSWORD, ELASTIC_ENV_USERNAME, SenderConfig, SinkType};
pub use elastic::ElasticClient;
pub use sender::{FLUSH_INTERVAL, Sender};
pub use sink::{SenderError, SinkClient, connect};
pub use tcp::TcpClient;

// Re-export types that are used in our public API
pub use kubeat_types::LogMessage;
