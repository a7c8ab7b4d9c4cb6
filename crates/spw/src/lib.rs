//! 🌊 spw — spillway: a bounded, time-and-size triggered batching buffer in front of a sink.
//!
//! 🎬 *[producers pour records in. they never wait. the buffer holds what it can, counts what it
//! can't, and every so often opens the gate and lets a batch through to the sink.]*
//!
//! - [`buffer`]: the [`TimedBuffer`](buffer::TimedBuffer) itself, its worker pool and its ticker
//! - [`handlers`]: the two traits the buffer talks to
//! - [`adapters`]: per-record and bulk adapters, plus drop notices
//! - [`rotation`]: daily destination names in a fixed timezone
//! - [`backends`]: in-memory, file, Elasticsearch and REST-proxy sinks
//! - [`pipeline`]: buffer + backend, closed in the right order
//! - [`app_config`]: figment-powered config loading
//!
//! 🦆

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, trace};

pub mod adapters;
pub mod app_config;
pub mod backends;
pub mod buffer;
pub mod handlers;
pub mod pipeline;
pub mod rotation;

use app_config::AppConfig;
use pipeline::Pipeline;

/// 🧾 What happened to the lines we were given.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub accepted: u64,
    pub rejected: u64,
}

/// 🚀 Read NDJSON lines from `input`, push each one through a pipeline built from `app_config`,
/// and close the pipeline at EOF. Blank lines are skipped. Rejected lines are counted, not fatal.
pub async fn run<R>(app_config: AppConfig, input: R) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let pipeline = Pipeline::from_config(&app_config)
        .await
        .context("💀 Failed to build the pipeline from config")?;

    let mut summary = RunSummary::default();
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 Failed to read the next input line")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if pipeline.submit(line.to_string()) {
            summary.accepted += 1;
        } else {
            summary.rejected += 1;
            trace!("🚪 Line rejected (rejected so far: {})", summary.rejected);
        }
    }

    pipeline
        .close()
        .await
        .context("💀 Input is exhausted, but the pipeline did not close cleanly")?;
    info!(
        "🏁 Done: {} line(s) accepted, {} rejected",
        summary.accepted, summary.rejected
    );
    Ok(summary)
}
