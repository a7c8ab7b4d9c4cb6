//! 🧵 The worker pool — a handful of tokio tasks pulling drain jobs off an MPMC queue.
//!
//! 🧠 Knowledge graph:
//! - `async_channel` (unbounded) is the queue. Ticker + size trigger push, workers pop.
//! - One worker = jobs run strictly one after another, in queue order.
//!   More workers = parallel drains, cross-batch order is whatever the scheduler felt like.
//! - Shutdown closes the queue; jobs already queued still run, then workers exit on `Err(RecvError)`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace, warn};

use super::Core;

// ⏳ one polling attempt = one second. the number of attempts is configurable, the second is not.
const TERMINATION_POLL: Duration = Duration::from_secs(1);

/// 📨 A request to drain the shelf. Ticks carry a doorbell so the ticker knows when it finished.
#[derive(Debug)]
pub(crate) struct Job {
    done: Option<oneshot::Sender<()>>,
}

impl Job {
    pub(crate) fn drain() -> Self {
        Self { done: None }
    }

    pub(crate) fn tick() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { done: Some(tx) }, rx)
    }
}

/// 📬 The producer end of the job queue. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub(crate) struct JobQueue {
    tx: async_channel::Sender<Job>,
}

impl JobQueue {
    /// Returns `false` once the queue is closed.
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.tx.try_send(job).is_ok()
    }
}

#[derive(Debug)]
pub(crate) struct WorkerPool {
    queue: JobQueue,
    workers: Mutex<Vec<JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl WorkerPool {
    /// 🏗️ Spawn `size` workers on `runtime`, all draining the same `core`.
    pub(crate) fn spawn<T: Send + 'static>(runtime: &Handle, size: usize, core: Arc<Core<T>>) -> Self {
        let (tx, rx) = async_channel::unbounded::<Job>();
        let workers = (0..size)
            .map(|worker_id| {
                let rx = rx.clone();
                let core = Arc::clone(&core);
                runtime.spawn(async move {
                    trace!("🧵 Worker {} reporting for duty", worker_id);
                    while let Ok(job) = rx.recv().await {
                        core.drain().await;
                        if let Some(done) = job.done {
                            // 🔔 the ticker may have been cancelled already; nobody to tell is fine
                            let _ = done.send(());
                        }
                    }
                    debug!("🏁 Worker {}: job queue closed and empty. Clocking out.", worker_id);
                })
            })
            .collect();

        Self {
            queue: JobQueue { tx },
            workers: Mutex::new(workers),
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub(crate) fn submit(&self, job: Job) -> bool {
        self.queue.submit(job)
    }

    /// 🛑 Graceful shutdown: close the queue, let queued and in-flight jobs finish,
    /// poll once a second for up to `attempts` seconds, then abort the stragglers.
    ///
    /// Returns `true` if every worker stopped on its own.
    pub(crate) async fn shutdown(&self, attempts: u32) -> bool {
        self.queue.tx.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        let abort_handles: Vec<AbortHandle> = workers.iter().map(JoinHandle::abort_handle).collect();
        let mut all = std::pin::pin!(futures::future::join_all(workers));

        let mut graceful = false;
        for attempt in 1..=attempts {
            debug!("⏳ Waiting for worker pool termination ... (attempt {}/{})", attempt, attempts);
            if tokio::time::timeout(TERMINATION_POLL, all.as_mut()).await.is_ok() {
                graceful = true;
                break;
            }
        }

        if !graceful {
            warn!(
                "⚠️ Worker pool still busy after {} attempt(s) of {:?}; forcing termination. In-flight batches are abandoned.",
                attempts, TERMINATION_POLL
            );
            abort_handles.iter().for_each(AbortHandle::abort);
            all.await;
        }

        self.terminated.store(true, Ordering::Release);
        graceful
    }

    /// 💥 No waiting, no goodbyes. Close the queue and abort every worker.
    pub(crate) fn shutdown_now(&self) {
        self.queue.tx.close();
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        self.terminated.store(true, Ordering::Release);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
