//! 🎬 *[a producer thread sprints past. it does not stop. it does not wait. it never waits.]*
//! *[behind it, a buffer quietly catches every record it can, and counts every one it can't.]*
//!
//! 🪣 The Buffer Core — a bounded, thread-safe holding pen with two flush triggers:
//! - **size**: once `threshold_size` records pile up, a drain is queued on the worker pool
//! - **time**: every `threshold_time_ms`, the ticker asks the pool to drain whatever is there
//!
//! 🧠 Knowledge graph:
//! - `Shelf` is the only shared mutable state. One `parking_lot::Mutex`, tiny critical sections.
//! - Snapshots leave the lock already detached (`std::mem::take`), so handlers own their batch.
//! - Drains run on [`worker_pool::WorkerPool`], never on a producer's thread.
//!   `flush()` and `close()` are the exceptions: they drain on the caller, on purpose, by contract.
//! - Size-triggered drains are coalesced (`drain_pending`) and take their snapshot when they run,
//!   so on a single-worker pool snapshot order == delivery order. No time travel. 🦆
//!
//! ⚠️ Durability is not a feature. This is RAM. If the process dies, the shelf dies with it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::handlers::{BatchHandler, DropObserver};

mod ticker;
mod worker_pool;

use worker_pool::{Job, WorkerPool};

// ============================================================
// 🔧 BufferConfig — the knobs
// ============================================================

/// ⏱️ How the periodic tick is paced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    /// 💤 Sleep `threshold_time` after the previous tick *finishes*. Slow handlers never overlap ticks.
    #[default]
    FixedDelay,
    /// 🥁 Tick every `threshold_time` on the wall clock. Late ticks fire back-to-back to catch up.
    FixedRate,
}

/// 🔧 Construction parameters for a [`TimedBuffer`]. Every field has a default.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// 🪣 Hard ceiling on buffered records. Submissions past this are dropped and counted.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    /// 📦 Buffered length that queues an immediate drain.
    #[serde(default = "default_threshold_size")]
    pub threshold_size: usize,
    /// ⏱️ Period of the background tick, in milliseconds.
    #[serde(default = "default_threshold_time_ms")]
    pub threshold_time_ms: u64,
    /// 🧵 Workers draining in the background. 1 keeps cross-batch ordering.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub delay_mode: DelayMode,
    /// ⏳ One-second polls to wait for the pool on close before pulling the plug.
    #[serde(default = "default_shutdown_wait_attempts")]
    pub shutdown_wait_attempts: u32,
}

// 🪣 10,000 records. Enough to survive a hiccup, not enough to eat the heap.
fn default_max_capacity() -> usize {
    10000
}

fn default_threshold_size() -> usize {
    1000
}

// ⏱️ once a second, whether anyone asked or not
fn default_threshold_time_ms() -> u64 {
    1000
}

fn default_worker_count() -> usize {
    1
}

fn default_shutdown_wait_attempts() -> u32 {
    5
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            threshold_size: default_threshold_size(),
            threshold_time_ms: default_threshold_time_ms(),
            worker_count: default_worker_count(),
            delay_mode: DelayMode::default(),
            shutdown_wait_attempts: default_shutdown_wait_attempts(),
        }
    }
}

impl BufferConfig {
    pub fn threshold_time(&self) -> Duration {
        Duration::from_millis(self.threshold_time_ms)
    }

    /// 🔒 Reject configs that would build a buffer that can't hold anything or never ticks.
    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            bail!("💀 max_capacity must be at least 1. A buffer that holds nothing is just a very elaborate /dev/null.");
        }
        if self.threshold_size == 0 {
            bail!("💀 threshold_size must be at least 1. Flushing on every zero records is a philosophy, not a config.");
        }
        if self.threshold_time_ms == 0 {
            bail!("💀 threshold_time_ms must be at least 1. A ticker with a zero period is a space heater.");
        }
        if self.worker_count == 0 {
            bail!("💀 worker_count must be at least 1. Somebody has to do the work.");
        }
        if self.shutdown_wait_attempts == 0 {
            bail!("💀 shutdown_wait_attempts must be at least 1. Give the workers one second. One.");
        }
        if self.threshold_size > self.max_capacity {
            warn!(
                "⚠️ threshold_size ({}) exceeds max_capacity ({}); the size trigger can never fire, only the ticker will drain",
                self.threshold_size, self.max_capacity
            );
        }
        Ok(())
    }
}

// ============================================================
// 📸 Snapshot + lifecycle
// ============================================================

/// 📸 An atomically detached batch: the records plus how many were dropped since the last one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub records: Vec<T>,
    pub dropped: u64,
}

impl<T> Snapshot<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 🔄 `Created → Running → Closing → Closed`. No sequels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Created,
    Running,
    Closing,
    Closed,
}

/// 🔒 Everything the lock protects. Nothing else is shared.
#[derive(Debug)]
struct Shelf<T> {
    records: Vec<T>,
    dropped: u64,
    drain_pending: bool,
    state: BufferState,
}

/// 🧠 The part of the buffer the workers share: config, shelf, and who to call.
pub(crate) struct Core<T> {
    config: BufferConfig,
    shelf: Mutex<Shelf<T>>,
    handler: Arc<dyn BatchHandler<T>>,
    observer: Option<Arc<dyn DropObserver>>,
}

impl<T: Send + 'static> Core<T> {
    fn take_snapshot(&self) -> Snapshot<T> {
        let mut shelf = self.shelf.lock();
        shelf.drain_pending = false;
        Snapshot {
            records: std::mem::take(&mut shelf.records),
            dropped: std::mem::take(&mut shelf.dropped),
        }
    }

    /// 🚰 Take whatever is on the shelf and hand it over. Empty shelf = no call, no noise.
    pub(crate) async fn drain(&self) {
        let snapshot = self.take_snapshot();
        self.deliver(snapshot).await;
    }

    /// 📬 The flush boundary. Whatever the handler does in here stays in here:
    /// errors get logged, panics get caught, the ticker lives to tick again.
    async fn deliver(&self, snapshot: Snapshot<T>) {
        if snapshot.is_empty() {
            return;
        }
        let Snapshot { records, dropped } = snapshot;
        let batch_len = records.len();
        let started = Instant::now();

        if dropped > 0 {
            if let Some(observer) = &self.observer {
                if AssertUnwindSafe(observer.on_dropped(dropped))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!("💀 Drop observer panicked while being told about {} dropped record(s)", dropped);
                }
            }
        }

        match AssertUnwindSafe(self.handler.process_batch(records))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                trace!("✅ Delivered batch of {} record(s)", batch_len);
            }
            Ok(Err(err)) => {
                error!("💀 Batch of {} record(s) was aborted by the sink: {:#}", batch_len, err);
            }
            Err(_) => {
                error!("💀 Batch handler panicked on a batch of {} record(s). The batch is gone; the buffer carries on.", batch_len);
            }
        }

        // ⚠️ a single worker stuck in here is a single worker not ticking
        let elapsed = started.elapsed();
        if elapsed > self.config.threshold_time() {
            warn!(
                "🐌 Delivering {} record(s) took {:?}, longer than the {:?} tick period; periodic drains are being starved",
                batch_len,
                elapsed,
                self.config.threshold_time()
            );
        }
    }
}

// ============================================================
// 🪣 TimedBuffer
// ============================================================

/// 🪣 Bounded, dual-triggered batching buffer.
///
/// Producers call [`submit`](Self::submit) from any thread and never block on a sink.
/// Batches reach the [`BatchHandler`] from a small tokio worker pool, on size or on time.
pub struct TimedBuffer<T> {
    core: Arc<Core<T>>,
    pool: WorkerPool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> TimedBuffer<T> {
    /// 🚀 Build the buffer, spawn the worker pool and the ticker, and start `Running`.
    ///
    /// Must be called from inside a tokio runtime; the workers live there.
    pub fn new(
        config: BufferConfig,
        handler: Arc<dyn BatchHandler<T>>,
        observer: Option<Arc<dyn DropObserver>>,
    ) -> Result<Self> {
        config.validate().context("💀 Refusing to build a TimedBuffer from an invalid config")?;
        let runtime = tokio::runtime::Handle::try_current().context(
            "💀 TimedBuffer needs a tokio runtime to host its workers, and there isn't one here",
        )?;

        let core = Arc::new(Core {
            shelf: Mutex::new(Shelf {
                records: Vec::new(),
                dropped: 0,
                drain_pending: false,
                state: BufferState::Created,
            }),
            config,
            handler,
            observer,
        });

        let pool = WorkerPool::spawn(&runtime, core.config.worker_count, Arc::clone(&core));
        let ticker = ticker::spawn(
            &runtime,
            pool.queue(),
            core.config.threshold_time(),
            core.config.delay_mode,
        );
        core.shelf.lock().state = BufferState::Running;

        debug!(
            "🪣 TimedBuffer running: max_capacity={}, threshold_size={}, threshold_time={:?}, workers={}, mode={:?}",
            core.config.max_capacity,
            core.config.threshold_size,
            core.config.threshold_time(),
            core.config.worker_count,
            core.config.delay_mode
        );

        Ok(Self {
            core,
            pool,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// 📥 Offer a record. `true` = it's on the shelf. `false` = full or closed, and that's fine.
    ///
    /// Never blocks on the sink. Holds the lock for one push and a couple of comparisons.
    pub fn submit(&self, record: T) -> bool {
        let drain_due = {
            let mut shelf = self.core.shelf.lock();
            if shelf.state != BufferState::Running {
                trace!("🚪 Buffer is {:?}; rejecting record", shelf.state);
                return false;
            }
            if shelf.records.len() >= self.core.config.max_capacity {
                shelf.dropped += 1;
                trace!("🪣 Buffer is full, dropping record! dropped_since_last={}", shelf.dropped);
                return false;
            }
            shelf.records.push(record);
            let due = shelf.records.len() >= self.core.config.threshold_size && !shelf.drain_pending;
            if due {
                shelf.drain_pending = true;
            }
            due
        };

        if drain_due && !self.pool.submit(Job::drain()) {
            // 🔄 the pool closed between our push and our enqueue; close() drains the shelf itself
            self.core.shelf.lock().drain_pending = false;
        }
        true
    }

    /// 📸 Atomically swap out the records and the drop counter. Nothing is delivered.
    pub fn take_snapshot(&self) -> Snapshot<T> {
        self.core.take_snapshot()
    }

    /// 🚿 Drain now, on the calling task. Bypasses the worker pool.
    pub async fn flush(&self) {
        self.core.drain().await;
    }

    /// 🛑 Stop ticking, drain what's left, wait for the workers, done. Idempotent.
    pub async fn close(&self) {
        self.close_with(|| {}).await;
    }

    /// 🛑 Like [`close`](Self::close), then runs `on_drained` once the pool has fully stopped.
    /// A second close is a no-op and does not run its callback.
    ///
    /// Returns `true` only for the one call that actually closed the buffer. A call that
    /// arrives while another close is still draining returns `false` straight away.
    pub async fn close_with<F>(&self, on_drained: F) -> bool
    where
        F: FnOnce() + Send,
    {
        {
            let mut shelf = self.core.shelf.lock();
            match shelf.state {
                BufferState::Closing | BufferState::Closed => {
                    debug!("🔁 TimedBuffer already {:?}; close is a no-op", shelf.state);
                    return false;
                }
                BufferState::Created | BufferState::Running => shelf.state = BufferState::Closing,
            }
        }

        debug!("🛑 Closing timed buffer");
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        self.core.drain().await;
        self.pool.shutdown(self.core.config.shutdown_wait_attempts).await;
        self.core.shelf.lock().state = BufferState::Closed;
        debug!("🏁 Timed buffer closed");

        on_drained();
        true
    }

    /// 💥 The forced variant: no final drain, no waiting. Whatever is still buffered is lost.
    pub fn close_now(&self) {
        let abandoned = {
            let mut shelf = self.core.shelf.lock();
            shelf.state = BufferState::Closed;
            shelf.records.len()
        };
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        self.pool.shutdown_now();
        if abandoned > 0 {
            warn!("💥 Forced close abandoned {} buffered record(s)", abandoned);
        }
    }

    pub fn state(&self) -> BufferState {
        self.core.shelf.lock().state
    }

    /// 📏 Records currently on the shelf.
    pub fn len(&self) -> usize {
        self.core.shelf.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 📉 Drops since the last snapshot. Peek only; does not reset.
    pub fn dropped(&self) -> u64 {
        self.core.shelf.lock().dropped
    }

    /// 🏁 True once every worker has exited (gracefully or otherwise).
    pub fn is_terminated(&self) -> bool {
        self.pool.is_terminated()
    }
}

impl<T> Drop for TimedBuffer<T> {
    fn drop(&mut self) {
        // 🧹 dropped without close(): don't leave a ticker and workers orbiting forever
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
        self.pool.shutdown_now();
    }
}

impl<T> std::fmt::Debug for TimedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🎭 handlers are trait objects and don't do Debug; the config is the interesting bit anyway
        f.debug_struct("TimedBuffer")
            .field("config", &self.core.config)
            .field("pool", &self.pool)
            .finish()
    }
}
