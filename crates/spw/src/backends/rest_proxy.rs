//! 📨 The REST-proxy backend — one record, one HTTP call, one message on a topic.
//!
//! 🎬 *[a broker sits behind an HTTP proxy. it speaks JSON, but only in a very particular envelope.]*
//!
//! Every record is wrapped as `{"records":[{"key":<key>,"value":<record>}]}` and posted to
//! `{url}/topics/{topic}`. Records that parse as JSON travel as JSON. Records that don't
//! travel as a JSON string, because the proxy only accepts JSON and we refuse to lose a line
//! over formatting.
//!
//! Driven by the per-record adapter: the first refusal abandons the rest of the batch.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::adapters::RecordSender;

const KAFKA_JSON_V2: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RestProxySinkConfig {
    /// 📡 Base URL of the REST proxy.
    pub url: String,
    pub topic: String,
    /// 🔑 Message key attached to every record.
    #[serde(default = "default_key")]
    pub key: String,
}

fn default_key() -> String {
    "json".to_string()
}

#[derive(Debug)]
pub struct RestProxySink {
    client: reqwest::Client,
    topic_url: String,
    key: String,
}

impl RestProxySink {
    pub fn new(config: RestProxySinkConfig) -> Result<Self> {
        if config.topic.is_empty() {
            bail!("💀 A REST proxy sink without a topic is shouting into a very well-documented void.");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born for the REST proxy sink.")?;
        Ok(Self {
            client,
            topic_url: format!("{}/topics/{}", config.url.trim_end_matches('/'), config.topic),
            key: config.key,
        })
    }

    fn envelope(&self, record: &str) -> Value {
        let value = serde_json::from_str::<Value>(record).unwrap_or_else(|_| Value::String(record.to_string()));
        json!({ "records": [ { "key": self.key, "value": value } ] })
    }
}

#[async_trait]
impl RecordSender<String> for RestProxySink {
    async fn send(&self, record: &String) -> Result<()> {
        let response = self
            .client
            .post(&self.topic_url)
            .header("Content-Type", KAFKA_JSON_V2)
            .body(self.envelope(record).to_string())
            .send()
            .await
            .with_context(|| format!("💀 The REST proxy at '{}' never answered", self.topic_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "💀 The REST proxy refused the record with {}. It said: '{}'",
                status,
                body
            );
        }
        trace!("📨 One record posted to '{}'", self.topic_url);
        Ok(())
    }
}
