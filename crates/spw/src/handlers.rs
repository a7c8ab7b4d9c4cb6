//! 🪝 Handlers — the two phone numbers the buffer is allowed to call.
//!
//! 🎬 *[INT. WORKER TASK — 2:47 AM. a snapshot sits on the desk, already detached, already nobody else's.]*
//!
//! The [`TimedBuffer`](crate::buffer::TimedBuffer) knows exactly two collaborators:
//! - a [`BatchHandler`] that receives each non-empty snapshot of records
//! - an optional [`DropObserver`] that hears how many records were turned away at the door
//!
//! No inheritance. No hierarchy. Two small traits and an `Arc`. 🦆

use anyhow::Result;
use async_trait::async_trait;

/// 📥 Consumes one detached batch of records.
///
/// # Contract 📜
/// - `records` is never empty and is in submission order.
/// - `records` is owned. Nobody else touches it after it arrives here.
/// - Returning `Err` aborts this batch only. The buffer logs it and keeps ticking.
/// - Invocations may overlap when the worker pool has more than one worker, hence `&self`.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync + 'static {
    /// 📦 Deliver a batch to wherever batches go to live out their days.
    async fn process_batch(&self, records: Vec<T>) -> Result<()>;

    /// 🗑️ Release whatever the handler holds (connections, file handles, regrets).
    /// Called once, after the buffer has fully drained and its workers have stopped.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 📉 Hears about data loss so data loss is never silent.
///
/// Called with the number of records rejected since the previous delivery,
/// right before the batch that follows them is handed to the [`BatchHandler`].
/// Never called with zero.
#[async_trait]
pub trait DropObserver: Send + Sync + 'static {
    async fn on_dropped(&self, count: u64);
}
