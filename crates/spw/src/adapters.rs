//! 🔌 Sink adapters — the translators between "here's a batch" and "here's how this sink eats".
//!
//! 🎬 *[two adapters stand at the loading dock. one carries boxes one at a time. one brings a forklift.]*
//!
//! - [`PerRecordAdapter`] sends records one by one through a [`RecordSender`] (a message broker).
//!   First failure aborts the rest of the batch. No retries. Partial loss is the accepted cost.
//! - [`BulkAdapter`] hands the whole batch to a [`BulkWriter`] in one call (a document store).
//!   One call per batch. Whatever atomicity the store offers is all the atomicity there is.
//!
//! Both implement [`BatchHandler`] and [`DropObserver`], and both turn a drop notification into
//! a [`DropNotice`] record written through their own sink. Data loss becomes data. 🦆
//!
//! 🧠 Knowledge graph: adapters don't log batch failures themselves; they return `Err` with
//! context and the buffer's flush boundary logs it once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

pub mod bulk;
pub mod per_record;

pub use bulk::BulkAdapter;
pub use per_record::PerRecordAdapter;

/// 📡 One record in, one send out. Implemented by broker-ish backends.
#[async_trait]
pub trait RecordSender<T>: Send + Sync + 'static {
    async fn send(&self, record: &T) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 🚜 A whole batch in, one write out. Implemented by store-ish backends.
#[async_trait]
pub trait BulkWriter<T>: Send + Sync + 'static {
    async fn write_bulk(&self, records: &[T]) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 📉 A record type that can describe its own losses.
pub trait DropNotice: Sized {
    /// 🧾 Render a diagnostic record saying `count` records were dropped.
    fn drop_notice(count: u64) -> Self;
}

impl DropNotice for Value {
    fn drop_notice(count: u64) -> Self {
        json!({
            "level": "WARN",
            "message": format!("buffer overflow: {count} record(s) dropped before reaching the sink"),
            "dropped": count,
            "savetime": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

impl DropNotice for String {
    fn drop_notice(count: u64) -> Self {
        Value::drop_notice(count).to_string()
    }
}
