use std::marker::PhantomData;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{trace, warn};

use super::{BulkWriter, DropNotice};
use crate::handlers::{BatchHandler, DropObserver};

/// 🚜 One batch, one bulk write. Fails as a unit, is logged as a unit, is not retried as a unit.
///
/// Partial writes are the writer's business. This layer promises exactly one thing:
/// `write_bulk` is called once per batch.
#[derive(Debug)]
pub struct BulkAdapter<W, T> {
    writer: W,
    _records: PhantomData<fn() -> T>,
}

impl<W, T> BulkAdapter<W, T> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            _records: PhantomData,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

#[async_trait]
impl<W, T> BatchHandler<T> for BulkAdapter<W, T>
where
    W: BulkWriter<T>,
    T: Send + Sync + 'static,
{
    async fn process_batch(&self, records: Vec<T>) -> Result<()> {
        self.writer
            .write_bulk(&records)
            .await
            .with_context(|| format!("💀 Bulk write of {} record(s) failed; the whole batch is abandoned", records.len()))?;
        trace!("🚜 Bulk-wrote {} record(s)", records.len());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer.close().await
    }
}

#[async_trait]
impl<W, T> DropObserver for BulkAdapter<W, T>
where
    W: BulkWriter<T>,
    T: DropNotice + Send + Sync + 'static,
{
    async fn on_dropped(&self, count: u64) {
        trace!("📉 Reporting {} dropped record(s) through the sink", count);
        let notice = [T::drop_notice(count)];
        if let Err(err) = self.writer.write_bulk(&notice).await {
            warn!("⚠️ Couldn't even write the drop notice for {} record(s): {:#}", count, err);
        }
    }
}
