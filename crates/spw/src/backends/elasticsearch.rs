//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The dashboard glows amber. A batch of log lines waits in a worker task, already detached,
//! already nobody else's. One `_bulk` request stands between it and an index. Maybe a new index.
//! It's past midnight in +08:00, after all.
//!
//! 🚀 One batch → one `POST {url}/_bulk` with an NDJSON body. The store decides what "partial
//! success" means. We log it and move on.
//!
//! 🗓️ With `daily_index` configured, every write first asks [`DestinationRotation`] which index
//! today is, and creates it (`PUT {url}/{index}`) when the day changed. "Already exists" counts
//! as created. Creation is idempotent because clocks are not monotonic and neither are we.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::adapters::BulkWriter;
use crate::rotation::{DailyRotationConfig, DestinationRotation};

// 🚰 ElasticsearchSinkConfig — auth is tri-modal: api_key, username+password, or
// "I hope anonymous works". The api key wins when both are present. Hierarchy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ElasticsearchSinkConfig {
    /// 📡 Where to send the documents. Scheme + host + port, all of it.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// 📦 Target index, or the base name of the daily index when `daily_index` is set.
    pub index: String,
    /// 🗓️ Present = one index per day, named `{index}_{strftime(name_format)}`.
    #[serde(default)]
    pub daily_index: Option<DailyRotationConfig>,
    /// 🕰️ Field stamped with the write time on every JSON-object record. `None` or `""` = no stamp.
    #[serde(default = "default_save_time_field")]
    pub save_time_field: Option<String>,
    /// 🧷 Merged into every JSON-object record after the stamp. Same key, extra field wins.
    #[serde(default)]
    pub extra_fields: Map<String, Value>,
}

fn default_save_time_field() -> Option<String> {
    Some("savetime".to_string())
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl BulkResponse {
    // 🔍 each item is `{"<action>": {"status": .., "error": {..}?}}`
    fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter_map(|item| item.as_object()?.values().next())
            .filter(|outcome| outcome.get("error").is_some())
            .count()
    }
}

/// 📡 Bulk writer for one Elasticsearch cluster.
#[derive(Debug)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    sink_config: ElasticsearchSinkConfig,
    rotation: Option<Mutex<DestinationRotation>>,
}

impl ElasticsearchSink {
    pub fn new(config: ElasticsearchSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS thing. It's always a TLS thing.")?;

        let rotation = config
            .daily_index
            .as_ref()
            .map(|daily| DestinationRotation::new(config.index.clone(), daily))
            .transpose()
            .context("💀 daily_index is configured, but its rotation settings are not usable")?
            .map(Mutex::new);

        Ok(Self {
            client,
            sink_config: config,
            rotation,
        })
    }

    fn base_url(&self) -> &str {
        self.sink_config.url.trim_end_matches('/')
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.sink_config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.sink_config.username {
            request.basic_auth(username, self.sink_config.password.as_ref())
        } else {
            request
        }
    }

    /// 🗓️ The index this batch goes to, creating today's index first when the day rolled over.
    async fn target_index(&self) -> Result<String> {
        match &self.rotation {
            None => Ok(self.sink_config.index.clone()),
            Some(rotation) => {
                let mut rotation = rotation.lock().await;
                rotation.ensure_current(|name| self.create_index(name)).await
            }
        }
    }

    /// 🏗️ `PUT {url}/{index}`. An index that already exists is as good as a fresh one.
    async fn create_index(&self, index: String) -> Result<()> {
        let index_url = format!("{}/{}", self.base_url(), index);
        let response = self
            .authorize(self.client.put(&index_url))
            .send()
            .await
            .with_context(|| format!("💀 Tried to create index '{}'. The network ghosted us.", index))?;

        let status = response.status();
        if status.is_success() {
            debug!("✅ Index '{}' created. Happy birthday.", index);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!("✅ Index '{}' already exists. Somebody beat us to it. Fine.", index);
            return Ok(());
        }
        bail!(
            "💀 Creating index '{}' was refused with {}. The cluster's reasoning: '{}'",
            index,
            status,
            body
        )
    }

    fn save_time_field(&self) -> Option<&str> {
        self.sink_config.save_time_field.as_deref().filter(|field| !field.is_empty())
    }

    /// 🧷 Stamp and decorate one record. Anything that isn't a JSON object goes out as it came in.
    fn enrich(&self, record: &str, saved_at: &str) -> Option<String> {
        let stamp = self.save_time_field();
        if stamp.is_none() && self.sink_config.extra_fields.is_empty() {
            return None;
        }
        let Ok(Value::Object(mut doc)) = serde_json::from_str::<Value>(record) else {
            return None;
        };
        if let Some(field) = stamp {
            doc.insert(field.to_string(), Value::String(saved_at.to_string()));
        }
        for (key, value) in &self.sink_config.extra_fields {
            doc.insert(key.clone(), value.clone());
        }
        Some(Value::Object(doc).to_string())
    }

    fn render_bulk_body(&self, index: &str, records: &[String]) -> String {
        let action = json!({ "index": { "_index": index } }).to_string();
        // 🕰️ one stamp per batch; the batch is written in one request anyway
        let saved_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut body = String::with_capacity(records.iter().map(|r| r.len() + action.len() + 2).sum());
        for record in records {
            let record = record.trim_end_matches('\n');
            body.push_str(&action);
            body.push('\n');
            match self.enrich(record, &saved_at) {
                Some(enriched) => body.push_str(&enriched),
                None => body.push_str(record),
            }
            body.push('\n');
        }
        body
    }

    async fn submit_bulk_request(&self, request_body: String) -> Result<()> {
        let bulk_url = format!("{}/_bulk", self.base_url());
        let response = self
            .authorize(self.client.post(&bulk_url))
            .header("Content-Type", "application/x-ndjson")
            .body(request_body)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts, check your feelings.")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!(
                "💀 The bulk request arrived, but Elasticsearch said '{}'. The body of the response read: '{}'",
                status,
                body
            );
        }

        match serde_json::from_str::<BulkResponse>(&body) {
            Ok(parsed) if parsed.errors => {
                warn!(
                    "⚠️ Bulk request partially failed: {} of {} item(s) were rejected by the store",
                    parsed.failed_items(),
                    parsed.items.len()
                );
            }
            Ok(_) => trace!("🚀 Bulk request landed. Documents have left the building."),
            Err(err) => debug!("🤷 Bulk succeeded with a body we couldn't read: {}", err),
        }
        Ok(())
    }

    #[cfg(test)]
    async fn force_clock(&self, now: Option<chrono::DateTime<chrono::Utc>>) {
        if let Some(rotation) = &self.rotation {
            rotation.lock().await.force_clock(now);
        }
    }
}

#[async_trait]
impl BulkWriter<String> for ElasticsearchSink {
    async fn write_bulk(&self, records: &[String]) -> Result<()> {
        let index = self.target_index().await?;
        let payload = self.render_bulk_body(&index, records);
        debug!(
            "📡 Sending {} record(s), {} bytes, to '{}' via /_bulk",
            records.len(),
            payload.len(),
            index
        );
        self.submit_bulk_request(payload).await
    }

    async fn close(&self) -> Result<()> {
        debug!("🗑️ Elasticsearch sink closing. No buffer to flush, just vibes to release.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> ElasticsearchSinkConfig {
        ElasticsearchSinkConfig {
            url: url.to_string(),
            username: None,
            password: None,
            api_key: None,
            index: "logs".to_string(),
            daily_index: None,
            save_time_field: None,
            extra_fields: Map::new(),
        }
    }

    async fn bulk_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
            .mount(&server)
            .await;
        server
    }

    /// 📄 The document lines of the first bulk request, action lines skipped.
    async fn sent_documents(server: &MockServer) -> Result<Vec<String>> {
        let requests = server.received_requests().await.unwrap_or_default();
        let body = String::from_utf8(requests[0].body.clone())?;
        Ok(body.lines().skip(1).step_by(2).map(str::to_string).collect())
    }

    fn records() -> Vec<String> {
        vec![r#"{"msg":"one"}"#.to_string(), r#"{"msg":"two"}"#.to_string()]
    }

    #[tokio::test]
    async fn the_one_where_a_batch_becomes_one_bulk_request() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(config(&server.uri()))?;
        sink.write_bulk(&records()).await?;

        let requests = server.received_requests().await.unwrap_or_default();
        let body = String::from_utf8(requests[0].body.clone())?;
        assert_eq!(
            body,
            "{\"index\":{\"_index\":\"logs\"}}\n{\"msg\":\"one\"}\n{\"index\":{\"_index\":\"logs\"}}\n{\"msg\":\"two\"}\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_document_gets_a_savetime_and_the_extras() -> Result<()> {
        let server = bulk_server().await;
        let mut extra_fields = Map::new();
        extra_fields.insert("app".to_string(), json!("spillway"));
        extra_fields.insert("msg".to_string(), json!("overruled"));
        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            save_time_field: default_save_time_field(),
            extra_fields,
            ..config(&server.uri())
        })?;

        sink.write_bulk(&[r#"{"msg":"one","level":"INFO"}"#.to_string()]).await?;

        let docs = sent_documents(&server).await?;
        let doc: Value = serde_json::from_str(&docs[0])?;
        assert_eq!(doc["level"], "INFO");
        assert_eq!(doc["app"], "spillway");
        assert_eq!(doc["msg"], "overruled", "extra fields are merged over the record");
        let saved_at = doc["savetime"].as_str().unwrap_or_default();
        assert!(chrono::DateTime::parse_from_rfc3339(saved_at).is_ok(), "savetime was '{saved_at}'");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_savetime_goes_by_another_name() -> Result<()> {
        let server = bulk_server().await;
        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            save_time_field: Some("save_time".to_string()),
            ..config(&server.uri())
        })?;

        sink.write_bulk(&records()).await?;

        for doc in sent_documents(&server).await? {
            let doc: Value = serde_json::from_str(&doc)?;
            assert!(doc["save_time"].is_string());
            assert!(doc.get("savetime").is_none());
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_plain_text_is_left_alone() -> Result<()> {
        let server = bulk_server().await;
        let mut extra_fields = Map::new();
        extra_fields.insert("app".to_string(), json!("spillway"));
        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            save_time_field: default_save_time_field(),
            extra_fields,
            ..config(&server.uri())
        })?;

        sink.write_bulk(&["just some words".to_string(), "[1,2,3]".to_string()]).await?;

        assert_eq!(sent_documents(&server).await?, vec!["just some words", "[1,2,3]"]);
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_save_time_field_turns_stamping_off() -> Result<()> {
        let parsed: ElasticsearchSinkConfig = toml::from_str(
            "url = \"http://localhost:9200\"\nindex = \"logs\"\nsave_time_field = \"\"",
        )?;
        let sink = ElasticsearchSink::new(parsed)?;
        assert_eq!(sink.enrich(r#"{"a":1}"#, "2024-03-09T10:00:00.000Z"), None);

        let defaults: ElasticsearchSinkConfig =
            toml::from_str("url = \"http://localhost:9200\"\nindex = \"logs\"")?;
        assert_eq!(defaults.save_time_field.as_deref(), Some("savetime"));
        assert!(defaults.extra_fields.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_outranks_the_password() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Authorization", "ApiKey s3cr3t"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            username: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            api_key: Some("s3cr3t".to_string()),
            ..config(&server.uri())
        })?;
        sink.write_bulk(&records()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_partial_failure_is_still_a_delivery() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    {"index": {"status": 201}},
                    {"index": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}
                ]
            })))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(config(&server.uri()))?;
        // ✅ partial-write semantics belong to the store; we warn, we don't fail
        sink.write_bulk(&records()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_cluster_is_on_fire() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("cluster_block_exception"))
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(config(&server.uri()))?;
        let err = sink.write_bulk(&records()).await.expect_err("a 503 is not a delivery");
        assert!(format!("{err:#}").contains("503"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_midnight_creates_a_new_index_exactly_once() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/logs_2024_3_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/logs_2024_3_10"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "resource_already_exists_exception"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            daily_index: Some(DailyRotationConfig::default()),
            ..config(&server.uri())
        })?;

        sink.force_clock(Some("2024-03-09T10:00:00Z".parse::<chrono::DateTime<chrono::Utc>>()?)).await;
        sink.write_bulk(&records()).await?;
        sink.write_bulk(&records()).await?;
        sink.force_clock(Some("2024-03-09T16:00:00Z".parse::<chrono::DateTime<chrono::Utc>>()?)).await;
        sink.write_bulk(&records()).await?;

        let requests = server.received_requests().await.unwrap_or_default();
        let last_bulk = requests
            .iter()
            .rev()
            .find(|r| r.url.path() == "/_bulk")
            .map(|r| String::from_utf8_lossy(&r.body).to_string())
            .unwrap_or_default();
        assert!(last_bulk.contains("\"_index\":\"logs_2024_3_10\""));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_index_creation_fails_and_the_batch_goes_nowhere() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sink = ElasticsearchSink::new(ElasticsearchSinkConfig {
            daily_index: Some(DailyRotationConfig::default()),
            ..config(&server.uri())
        })?;
        assert!(sink.write_bulk(&records()).await.is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_a_bad_offset_fails_at_construction() {
        let result = ElasticsearchSink::new(ElasticsearchSinkConfig {
            daily_index: Some(DailyRotationConfig {
                utc_offset: "eight-ish".to_string(),
                ..DailyRotationConfig::default()
            }),
            ..config("http://localhost:9200")
        });
        assert!(result.is_err());
    }
}
