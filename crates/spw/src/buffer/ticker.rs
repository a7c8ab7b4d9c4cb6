//! ⏱️ The ticker — asks the worker pool to drain every `threshold_time`, forever, or until aborted.
//!
//! It never touches the shelf itself. It rings the pool's doorbell and, in both modes,
//! waits for that tick to finish before scheduling the next one, so ticks never pile up.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::DelayMode;
use super::worker_pool::{Job, JobQueue};

pub(super) fn spawn(runtime: &Handle, queue: JobQueue, period: Duration, mode: DelayMode) -> JoinHandle<()> {
    runtime.spawn(async move {
        match mode {
            DelayMode::FixedDelay => loop {
                tokio::time::sleep(period).await;
                if !tick_and_wait(&queue).await {
                    break;
                }
            },
            DelayMode::FixedRate => {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                // 🥁 late? fire immediately until we've caught up, like a scheduled executor would
                interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
                loop {
                    interval.tick().await;
                    if !tick_and_wait(&queue).await {
                        break;
                    }
                }
            }
        }
        debug!("⏹️ Ticker stopped: the job queue is closed");
    })
}

/// 🔔 Queue one tick and wait for a worker to finish it. `false` = the pool is gone.
async fn tick_and_wait(queue: &JobQueue) -> bool {
    let (job, done) = Job::tick();
    if !queue.submit(job) {
        return false;
    }
    done.await.is_ok()
}
