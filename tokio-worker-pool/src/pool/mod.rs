pub(crate) mod handle;
pub(crate) mod slots;
#[cfg(test)]
mod tests;
mod worker;

use std::{
    num::NonZeroUsize,
    sync::{atomic::AtomicUsize, Arc},
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    job::Job,
    metrics::{Metrics, MetricsStorage},
};

use self::{
    handle::{JobAssignment, JobHandle},
    slots::{Slots, SlotsNewArgs},
};

/// Number of jobs a worker thread runs before it is replaced by a fresh one.
pub const DEFAULT_MAX_TASKS_PER_WORKER: usize = 5;

const SHUTDOWN_DEBUG_DUMP_PERIOD: Duration = Duration::from_secs(10);

/// What [`WorkerPool::shutdown`] does with work that's still queued or running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Run queued jobs and wait for running ones.
    #[default]
    Wait,
    /// Reject queued jobs with [`SystemError::Cancelled`](crate::SystemError::Cancelled).
    /// Running jobs can't be interrupted; their handles resolve to `Cancelled` too.
    Cancel,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently running jobs, one OS thread each.
    pub pool_size: NonZeroUsize,
    /// Replace a worker thread after it ran this many jobs. `None` keeps workers forever.
    pub max_tasks_per_worker: Option<NonZeroUsize>,
    pub shutdown_mode: ShutdownMode,
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_size: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            max_tasks_per_worker: NonZeroUsize::new(DEFAULT_MAX_TASKS_PER_WORKER),
            shutdown_mode: ShutdownMode::Wait,
            thread_name_prefix: "pool-worker".to_owned(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("spawn worker thread: {0}")]
    SpawnWorker(#[source] std::io::Error),
}

/// A bounded pool of worker threads. Use [`Self::launch`] to start, [`Self::submit`] to run jobs.
///
/// The pool owns all of its workers; callers only ever see [`JobHandle`]s.
///
/// Call [`shutdown`](WorkerPool::shutdown) for explicit shutdown with the ability to wait for
/// in-flight work and for the worker threads to exit.
/// Alternatively, `drop` will also initiate shutdown (in [`ShutdownMode::Wait`]), but not wait for it.
/// That makes it safe to bail out with `?` or a panic in the middle of a batch of submissions.
pub struct WorkerPool {
    id: usize,
    slots: Slots,
    config: PoolConfig,
    cancel: CancellationToken,
    drained_rx: watch::Receiver<bool>,
    metrics: Arc<MetricsStorage>,
}

static POOL_ID: AtomicUsize = AtomicUsize::new(0);

impl WorkerPool {
    /// Spawns `config.pool_size` worker threads.
    pub fn launch(config: PoolConfig) -> Result<WorkerPool, LaunchError> {
        let id = POOL_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let metrics = Arc::new(MetricsStorage::new_const());
        let (slots, drained_rx) = Slots::new(SlotsNewArgs {
            id,
            pool_size: config.pool_size,
            max_tasks_per_worker: config.max_tasks_per_worker,
            thread_name_prefix: config.thread_name_prefix.clone(),
            metrics: Arc::clone(&metrics),
        });
        let pool = WorkerPool {
            id,
            slots,
            config,
            cancel: CancellationToken::new(),
            drained_rx,
            metrics,
        };
        // on error, dropping `pool` shuts down the workers that did get spawned
        pool.slots.fill().map_err(LaunchError::SpawnWorker)?;
        info!(
            pool_id = id,
            pool_size = pool.config.pool_size.get(),
            max_tasks_per_worker = ?pool.config.max_tasks_per_worker,
            "launched worker pool"
        );
        Ok(pool)
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size.get()
    }

    /// Schedule `job` on the next free worker and return a handle to await its result.
    ///
    /// Never blocks. If all workers are busy, the job waits in a FIFO queue inside the pool.
    /// Once shutdown has been initiated, the handle resolves to
    /// [`SystemError::PoolShuttingDown`](crate::SystemError::PoolShuttingDown).
    pub fn submit<J: Job>(&self, job: J) -> JobHandle<J::Output, J::Error> {
        let (assignment, handle) = JobAssignment::new(job, self.cancel.child_token());
        self.slots.submit(Box::new(assignment));
        handle
    }

    /// Initiate shutdown without waiting for it. Idempotent.
    pub fn initiate_shutdown(&self) {
        if let ShutdownMode::Cancel = self.config.shutdown_mode {
            self.cancel.cancel();
        }
        self.slots.set_draining(self.config.shutdown_mode);
    }

    /// Initiate shutdown and wait until all in-flight work is done and every worker
    /// thread has been joined.
    ///
    /// Idempotent; concurrent and repeated calls all return once the pool is drained.
    pub async fn shutdown(&self) {
        self.initiate_shutdown();
        let mut drained_rx = self.drained_rx.clone();
        let mut debug_dump = tokio::time::interval(SHUTDOWN_DEBUG_DUMP_PERIOD);
        debug_dump.tick().await;
        while !*drained_rx.borrow_and_update() {
            tokio::select! {
                res = drained_rx.changed() => {
                    res.expect("we hold the sender through self.slots");
                }
                _ = debug_dump.tick() => {
                    self.slots.debug_dump();
                }
            }
        }
        let threads = self.slots.take_threads();
        if threads.is_empty() {
            return;
        }
        let pool_id = self.id;
        let join_res = tokio::task::spawn_blocking(move || {
            for jh in threads {
                if jh.join().is_err() {
                    error!(pool_id, "worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = join_res {
            error!(pool_id, "joining worker threads failed: {e}");
        }
        debug!(pool_id, "all worker threads joined");
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.make_pub()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.initiate_shutdown();
    }
}
