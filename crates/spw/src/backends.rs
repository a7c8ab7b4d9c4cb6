//! 🔌 Backends — where the real I/O happens.
//!
//! 🎭 This module is the casting agency. Need to bulk-write into a document store?
//! Post one message at a time through a broker proxy? Append to a flat file?
//! Hoard everything in RAM for a test? We've got a backend for that.
//!
//! Each backend implements the narrow capability its sink actually has
//! ([`RecordSender`](crate::adapters::RecordSender) or [`BulkWriter`](crate::adapters::BulkWriter)),
//! and [`SinkBackend`] wraps it in the matching adapter so the buffer only ever sees a
//! [`BatchHandler`] and a [`DropObserver`].
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::adapters::{BulkAdapter, PerRecordAdapter};
use crate::app_config::SinkConfig;
use crate::handlers::{BatchHandler, DropObserver};

pub mod elasticsearch;
pub mod file;
pub mod in_mem;
pub mod rest_proxy;

pub use elasticsearch::{ElasticsearchSink, ElasticsearchSinkConfig};
pub use file::{FileSink, FileSinkConfig};
pub use in_mem::InMemorySink;
pub use rest_proxy::{RestProxySink, RestProxySinkConfig};

/// 🎛️ Every configured sink, already wearing its adapter.
#[derive(Debug)]
pub enum SinkBackend {
    InMemory(BulkAdapter<InMemorySink<String>, String>),
    File(BulkAdapter<FileSink, String>),
    Elasticsearch(BulkAdapter<ElasticsearchSink, String>),
    RestProxy(PerRecordAdapter<RestProxySink, String>),
}

impl SinkBackend {
    /// 🏗️ Build the backend a [`SinkConfig`] asks for.
    pub async fn from_config(config: &SinkConfig) -> Result<Self> {
        let backend = match config {
            SinkConfig::InMemory(()) => Self::InMemory(BulkAdapter::new(InMemorySink::new())),
            SinkConfig::File(file_config) => Self::File(BulkAdapter::new(
                FileSink::new(file_config.clone())
                    .await
                    .context("💀 Failed to set up the file sink")?,
            )),
            SinkConfig::Elasticsearch(es_config) => Self::Elasticsearch(BulkAdapter::new(
                ElasticsearchSink::new(es_config.clone()).context("💀 Failed to set up the Elasticsearch sink")?,
            )),
            SinkConfig::RestProxy(proxy_config) => Self::RestProxy(PerRecordAdapter::new(
                RestProxySink::new(proxy_config.clone()).context("💀 Failed to set up the REST proxy sink")?,
            )),
        };
        info!("🔌 Sink backend ready: {}", backend.name());
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SinkBackend::InMemory(_) => "in_memory",
            SinkBackend::File(_) => "file",
            SinkBackend::Elasticsearch(_) => "elasticsearch",
            SinkBackend::RestProxy(_) => "rest_proxy",
        }
    }
}

#[async_trait]
impl BatchHandler<String> for SinkBackend {
    async fn process_batch(&self, records: Vec<String>) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.process_batch(records).await,
            SinkBackend::File(sink) => sink.process_batch(records).await,
            SinkBackend::Elasticsearch(sink) => sink.process_batch(records).await,
            SinkBackend::RestProxy(sink) => sink.process_batch(records).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => BatchHandler::close(sink).await,
            SinkBackend::File(sink) => BatchHandler::close(sink).await,
            SinkBackend::Elasticsearch(sink) => BatchHandler::close(sink).await,
            SinkBackend::RestProxy(sink) => BatchHandler::close(sink).await,
        }
    }
}

#[async_trait]
impl DropObserver for SinkBackend {
    async fn on_dropped(&self, count: u64) {
        match self {
            SinkBackend::InMemory(sink) => sink.on_dropped(count).await,
            SinkBackend::File(sink) => sink.on_dropped(count).await,
            SinkBackend::Elasticsearch(sink) => sink.on_dropped(count).await,
            SinkBackend::RestProxy(sink) => sink.on_dropped(count).await,
        }
    }
}
