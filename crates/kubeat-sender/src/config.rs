use std::path::Path;

use serde::Deserialize;

use crate::sink::SenderError;

/// Environment variables consulted when the config carries no credentials
pub const ELASTIC_ENV_USERNAME: &str = "KUBEAT_ELASTIC_USERNAME";
pub const ELASTIC_ENV_PASSWORD: &str = "KUBEAT_ELASTIC_PASSWORD";

const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Which sink client the dispatcher pushes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    Elasticsearch,
    Tcp,
}

/// Sender configuration, loaded once at startup and read-only thereafter
#[derive(Clone, Debug, Deserialize)]
pub struct SenderConfig {
    #[serde(rename = "type")]
    pub sink: SinkType,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

impl SenderConfig {
    /// Load the JSON sender configuration from disk
    pub fn from_file(path: &Path) -> Result<Self, SenderError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
