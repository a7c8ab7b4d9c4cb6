use std::marker::PhantomData;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{trace, warn};

use super::{DropNotice, RecordSender};
use crate::handlers::{BatchHandler, DropObserver};

/// 📡 Sends a batch one record at a time. First failure = the rest of the batch stays home.
///
/// No retries. No error leaks past `process_batch`'s `Err`. The buffer's flush boundary logs it,
/// the next tick happens anyway, and life goes on for everyone except the abandoned records.
#[derive(Debug)]
pub struct PerRecordAdapter<S, T> {
    sender: S,
    _records: PhantomData<fn() -> T>,
}

impl<S, T> PerRecordAdapter<S, T> {
    pub fn new(sender: S) -> Self {
        Self {
            sender,
            _records: PhantomData,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }
}

#[async_trait]
impl<S, T> BatchHandler<T> for PerRecordAdapter<S, T>
where
    S: RecordSender<T>,
    T: Send + Sync + 'static,
{
    async fn process_batch(&self, records: Vec<T>) -> Result<()> {
        let total = records.len();
        for (sent, record) in records.iter().enumerate() {
            self.sender.send(record).await.with_context(|| {
                format!(
                    "💀 Per-record send failed (total={}, sent={}); the remaining {} record(s) of this batch were abandoned",
                    total,
                    sent,
                    total - sent
                )
            })?;
        }
        trace!("📡 Sent {} record(s) one by one", total);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sender.close().await
    }
}

#[async_trait]
impl<S, T> DropObserver for PerRecordAdapter<S, T>
where
    S: RecordSender<T>,
    T: DropNotice + Send + Sync + 'static,
{
    async fn on_dropped(&self, count: u64) {
        trace!("📉 Reporting {} dropped record(s) through the sink", count);
        let notice = T::drop_notice(count);
        if let Err(err) = self.sender.send(&notice).await {
            warn!("⚠️ Couldn't even send the drop notice for {} record(s): {:#}", count, err);
        }
    }
}
