use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use kubeat_types::LogMessage;

use crate::config::{ELASTIC_ENV_PASSWORD, ELASTIC_ENV_USERNAME, SenderConfig};
use crate::sink::{SenderError, SinkClient};

/// Bulk-indexing Elasticsearch sink with daily-rolled indices
pub struct ElasticClient {
    http: reqwest::Client,
    host: String,
    credentials: Option<(String, String)>,
    prefix: String,
    doc_type: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
}

impl ElasticClient {
    pub fn connect(config: &SenderConfig) -> Result<Self, SenderError> {
        let host = config.hosts.first().cloned().ok_or_else(|| {
            SenderError::Config("elasticsearch sink needs at least one host".to_string())
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            credentials: resolve_credentials(config),
            prefix: config.index.clone(),
            doc_type: config.doc_type.clone(),
        })
    }

    /// Daily index the batch goes into
    fn index_name(&self) -> String {
        format!("{}-{}", self.prefix, Utc::now().format("%Y.%m.%d"))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }
        request
    }

    async fn ensure_index(&self, index: &str) -> Result<(), SenderError> {
        let url = format!("{}/{}", self.host, index);
        let head = self.request(reqwest::Method::HEAD, url.clone()).send().await?;
        if head.status() == reqwest::StatusCode::NOT_FOUND {
            self.request(reqwest::Method::PUT, url)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }

    /// Newline-delimited bulk body: one action line and one document per message
    fn bulk_body(&self, index: &str, batch: &BTreeMap<i64, LogMessage>) -> Result<String, SenderError> {
        let mut body = String::new();
        for msg in batch.values() {
            let action = serde_json::json!({
                "index": {
                    "_index": index,
                    "_type": self.doc_type,
                    "_id": Uuid::new_v4().to_string(),
                }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(msg)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl SinkClient for ElasticClient {
    async fn push(&self, batch: &BTreeMap<i64, LogMessage>) -> Result<(), SenderError> {
        let index = self.index_name();
        self.ensure_index(&index).await?;

        info!(count = batch.len(), index = %index, "sending messages to elasticsearch");
        let body = self.bulk_body(&index, batch)?;
        let response = self
            .request(reqwest::Method::POST, format!("{}/_bulk", self.host))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let bulk: BulkResponse = response.json().await?;
        if bulk.errors {
            warn!(index = %index, "bulk response reported item failures");
        }
        info!(took_ms = bulk.took, "indexed");
        Ok(())
    }
}

fn resolve_credentials(config: &SenderConfig) -> Option<(String, String)> {
    if !config.username.is_empty() && !config.password.is_empty() {
        return Some((config.username.clone(), config.password.clone()));
    }
    let username = std::env::var(ELASTIC_ENV_USERNAME).ok()?;
    let password = std::env::var(ELASTIC_ENV_PASSWORD).ok()?;
    Some((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkType;

    fn config() -> SenderConfig {
        SenderConfig {
            sink: SinkType::Elasticsearch,
            hosts: vec!["http://es:9200/".to_string()],
            username: "beats".to_string(),
            password: "secret".to_string(),
            index: "kubeat".to_string(),
            doc_type: "log".to_string(),
            limit: 1000,
        }
    }

    #[test]
    fn connect_requires_a_host() {
        let mut config = config();
        config.hosts.clear();
        assert!(ElasticClient::connect(&config).is_err());
    }

    #[test]
    fn host_is_normalized() {
        let client = ElasticClient::connect(&config()).unwrap();
        assert_eq!(client.host, "http://es:9200");
    }

    #[test]
    fn index_name_rolls_daily() {
        let client = ElasticClient::connect(&config()).unwrap();
        let expected = format!("kubeat-{}", Utc::now().format("%Y.%m.%d"));
        assert_eq!(client.index_name(), expected);
    }

    #[test]
    fn explicit_credentials_win() {
        let client = ElasticClient::connect(&config()).unwrap();
        assert_eq!(
            client.credentials,
            Some(("beats".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn bulk_body_pairs_actions_with_documents() {
        let client = ElasticClient::connect(&config()).unwrap();
        let mut batch = BTreeMap::new();
        batch.insert(1, LogMessage::new("default", "web-1", "a", None));
        batch.insert(2, LogMessage::new("default", "web-1", "b", None));

        let body = client.bulk_body("kubeat-2026.08.01", &batch).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "kubeat-2026.08.01");
        assert_eq!(action["index"]["_type"], "log");
        assert!(action["index"]["_id"].is_string());

        let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["message"], "a");
    }

    #[test]
    fn bulk_document_ids_are_fresh() {
        let client = ElasticClient::connect(&config()).unwrap();
        let mut batch = BTreeMap::new();
        batch.insert(1, LogMessage::new("default", "web-1", "a", None));
        batch.insert(2, LogMessage::new("default", "web-1", "b", None));

        let body = client.bulk_body("kubeat-2026.08.01", &batch).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_ne!(first["index"]["_id"], second["index"]["_id"]);
    }
}
