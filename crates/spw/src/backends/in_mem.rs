//! # Previously, on Spillway...
//!
//! 🎬 The records needed somewhere to land. Somewhere with no network, no disk, no
//! on-call rotation. Somewhere that forgets everything the moment the process exits.
//!
//! `InMemorySink` is that place. It keeps every record it receives in a shared `Vec`,
//! and remembers how each one arrived (one at a time, or in a bulk delivery),
//! so tests can check what actually reached the sink and in what shape.
//!
//! ⚠️ Not for production. If this is in prod, the data is in RAM, and RAM is a state of mind.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::adapters::{BulkWriter, RecordSender};

/// 📦 A sink that never forgets (until the process does).
///
/// Clone-able so tests can keep a handle after handing one to a pipeline.
/// Every clone shares the same storage.
#[derive(Debug)]
pub struct InMemorySink<T> {
    received: Arc<Mutex<Vec<T>>>,
    deliveries: Arc<Mutex<Vec<usize>>>,
}

impl<T> Clone for InMemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            received: Arc::clone(&self.received),
            deliveries: Arc::clone(&self.deliveries),
        }
    }
}

impl<T> Default for InMemorySink<T> {
    fn default() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> InMemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Everything received so far, in arrival order.
    pub fn received(&self) -> Vec<T> {
        self.received.lock().clone()
    }

    /// 📏 Size of each delivery: `1` per `send`, `records.len()` per `write_bulk`.
    pub fn deliveries(&self) -> Vec<usize> {
        self.deliveries.lock().clone()
    }

    fn store(&self, records: &[T]) {
        self.received.lock().extend_from_slice(records);
        self.deliveries.lock().push(records.len());
    }
}

#[async_trait]
impl<T> RecordSender<T> for InMemorySink<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn send(&self, record: &T) -> Result<()> {
        self.store(std::slice::from_ref(record));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("🗑️ In-memory sink closing with {} record(s) on hand", self.received.lock().len());
        Ok(())
    }
}

#[async_trait]
impl<T> BulkWriter<T> for InMemorySink<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn write_bulk(&self, records: &[T]) -> Result<()> {
        trace!("📦 In-memory sink swallowing {} record(s) in one gulp", records.len());
        self.store(records);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("🗑️ In-memory sink closing with {} record(s) on hand", self.received.lock().len());
        Ok(())
    }
}
