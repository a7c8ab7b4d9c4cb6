//! 🚰 Pipeline — a [`TimedBuffer`] welded to one sink adapter.
//!
//! The buffer needs a [`BatchHandler`] and a [`DropObserver`]; every adapter is both.
//! `Pipeline` hands the same adapter to the buffer in both roles, and remembers it so
//! the sink can be closed after the buffer's final drain, never before.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::backends::SinkBackend;
use crate::buffer::{BufferConfig, BufferState, TimedBuffer};
use crate::handlers::{BatchHandler, DropObserver};

pub struct Pipeline<T> {
    buffer: TimedBuffer<T>,
    handler: Arc<dyn BatchHandler<T>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// 🏗️ Wire `adapter` in as both the batch handler and the drop observer.
    pub fn new<A>(config: BufferConfig, adapter: A) -> Result<Self>
    where
        A: BatchHandler<T> + DropObserver,
    {
        let adapter = Arc::new(adapter);
        let handler: Arc<dyn BatchHandler<T>> = adapter.clone();
        let observer: Arc<dyn DropObserver> = adapter;
        let buffer = TimedBuffer::new(config, Arc::clone(&handler), Some(observer))
            .context("💀 Could not build the pipeline's buffer")?;
        Ok(Self { buffer, handler })
    }

    /// 📥 See [`TimedBuffer::submit`]. Never blocks on the sink.
    pub fn submit(&self, record: T) -> bool {
        self.buffer.submit(record)
    }

    pub async fn flush(&self) {
        self.buffer.flush().await;
    }

    /// 🛑 Drain the buffer, stop its workers, then close the sink. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.close_with(|| {}).await
    }

    /// 🛑 Like [`close`](Self::close), then runs `on_drained` once the sink is closed.
    ///
    /// Only the call that moves the buffer out of `Running` closes the sink. Any other call,
    /// concurrent or later, returns `Ok(())` without touching the sink or running its callback.
    pub async fn close_with<F>(&self, on_drained: F) -> Result<()>
    where
        F: FnOnce() + Send,
    {
        if !self.buffer.close_with(|| {}).await {
            debug!("🚪 Pipeline already closing or closed");
            return Ok(());
        }
        self.handler
            .close()
            .await
            .context("💀 The buffer drained cleanly, but the sink would not close")?;
        on_drained();
        Ok(())
    }

    pub fn buffer(&self) -> &TimedBuffer<T> {
        &self.buffer
    }

    pub fn state(&self) -> BufferState {
        self.buffer.state()
    }
}

impl Pipeline<String> {
    /// 🚀 Build the configured sink backend and put a buffer in front of it.
    pub async fn from_config(app_config: &AppConfig) -> Result<Self> {
        let backend = SinkBackend::from_config(&app_config.sink_config).await?;
        info!("🚰 Pipeline ready: buffer → {}", backend.name());
        Self::new(app_config.buffer.clone(), backend)
    }
}
