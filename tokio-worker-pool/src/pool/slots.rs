//! Structure to keep track of workers and the jobs they run.
//!
//! [`Slots`] serves the following purposes:
//!
//! - Own one worker per slot, and know which workers are busy.
//! - Limit the number of concurrently running jobs to the number of slots.
//!   Jobs submitted while all slots are busy wait in a FIFO queue inside the table,
//!   so submission never blocks the caller.
//! - Keep track of what's in flight so during pool shutdown we know when we're done.
//!
//! There is one [`Slots`] instance per [`crate::WorkerPool`]; the pool and every worker
//! thread hold a clone of it.
//!
//! The consumers of this module are [`crate::WorkerPool::submit`], which calls
//! [`Slots::submit`], and the worker threads, which call [`Slots::return_slot`]
//! after every job.

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use super::{
    handle::{Assignment, SystemError},
    worker::{self, Worker},
    ShutdownMode,
};
use crate::metrics::MetricsStorage;

/// See module-level comment [`crate::pool::slots`].
#[derive(Clone)]
pub(crate) struct Slots {
    id: usize,
    inner: Arc<Mutex<SlotsInner>>,
}

struct SlotsInner {
    id: usize,
    phase: Phase,
    storage: Vec<Slot>,
    unused_indices: Vec<usize>,
    queue: VecDeque<Box<dyn Assignment>>,
    busy: usize,
    threads: Vec<JoinHandle<()>>,
    max_tasks_per_worker: Option<NonZeroUsize>,
    thread_name_prefix: String,
    metrics: Arc<MetricsStorage>,
    drained_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Draining,
    Drained,
}

enum Slot {
    Undefined,
    /// No worker thread behind this slot. The next dispatch spawns one.
    Vacant,
    Idle(Worker),
    Busy(Worker),
}

/// How a worker hands back its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The worker is ready for more work.
    Reusable,
    /// The worker reached its assignment limit and is exiting.
    Retire,
    /// The job panicked; the worker is exiting.
    Crashed,
}

pub(crate) struct SlotsNewArgs {
    pub(crate) id: usize,
    pub(crate) pool_size: NonZeroUsize,
    pub(crate) max_tasks_per_worker: Option<NonZeroUsize>,
    pub(crate) thread_name_prefix: String,
    pub(crate) metrics: Arc<MetricsStorage>,
}

/// Work that must happen after the table lock is released.
#[derive(Default)]
#[must_use]
struct Deferred {
    rejections: Vec<(Box<dyn Assignment>, SystemError)>,
}

impl Deferred {
    fn run(self) {
        for (assignment, err) in self.rejections {
            assignment.reject(err);
        }
    }
}

impl Slots {
    pub(crate) fn new(args: SlotsNewArgs) -> (Slots, watch::Receiver<bool>) {
        let SlotsNewArgs {
            id,
            pool_size,
            max_tasks_per_worker,
            thread_name_prefix,
            metrics,
        } = args;
        let (drained_tx, drained_rx) = watch::channel(false);
        let inner = SlotsInner {
            id,
            phase: Phase::Open,
            storage: (0..pool_size.get()).map(|_| Slot::Vacant).collect(),
            // reversed so that pop() hands out slot 0 first
            unused_indices: (0..pool_size.get()).rev().collect(),
            queue: VecDeque::new(),
            busy: 0,
            threads: Vec::with_capacity(pool_size.get()),
            max_tasks_per_worker,
            thread_name_prefix,
            metrics,
            drained_tx,
        };
        (
            Slots {
                id,
                inner: Arc::new(Mutex::new(inner)),
            },
            drained_rx,
        )
    }

    /// Spawn a worker into every vacant slot.
    pub(crate) fn fill(&self) -> std::io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for idx in 0..inner.storage.len() {
            if let Slot::Vacant = inner.storage[idx] {
                let worker = inner.spawn_worker(self, idx)?;
                inner.storage[idx] = Slot::Idle(worker);
            }
        }
        Ok(())
    }

    pub(crate) fn submit(&self, assignment: Box<dyn Assignment>) {
        let deferred = {
            let mut inner = self.inner.lock().unwrap();
            let phase = inner.phase;
            match phase {
                Phase::Open => {}
                Phase::Draining | Phase::Drained => {
                    drop(inner);
                    assignment.reject(SystemError::PoolShuttingDown);
                    return;
                }
            }
            match inner.unused_indices.pop() {
                Some(idx) => inner.dispatch(self, idx, assignment),
                None => {
                    trace!(queued = inner.queue.len() + 1, "all slots busy, queueing job");
                    inner.queue.push_back(assignment);
                    Deferred::default()
                }
            }
        };
        deferred.run();
    }

    /// Called by the worker thread that occupies slot `idx` once it's done with its job.
    pub(crate) fn return_slot(&self, idx: usize, disposition: Disposition) {
        let deferred = {
            let mut inner = self.inner.lock().unwrap();
            inner.return_slot(self, idx, disposition)
        };
        deferred.run();
    }

    pub(crate) fn set_draining(&self, mode: ShutdownMode) {
        let deferred = {
            let mut inner = self.inner.lock().unwrap();
            inner.set_draining(mode)
        };
        deferred.run();
    }

    pub(crate) fn take_threads(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.threads)
    }

    /// Number of worker join handles not yet joined, and how many of those have exited.
    #[cfg(test)]
    pub(crate) fn retained_threads(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let exited = inner.threads.iter().filter(|jh| jh.is_finished()).count();
        (inner.threads.len(), exited)
    }

    pub(crate) fn debug_dump(&self) {
        let inner = self.inner.lock().unwrap();
        let mut by_state_discr = HashMap::new();
        for slot in &inner.storage {
            by_state_discr
                .entry(slot.discriminant_str())
                .and_modify(|v| *v += 1)
                .or_insert(1);
        }
        debug!(
            pool_id = self.id,
            phase = ?inner.phase,
            busy = inner.busy,
            queued = inner.queue.len(),
            "slots by state: {:?}",
            by_state_discr
        );
    }
}

impl SlotsInner {
    fn spawn_worker(&mut self, slots: &Slots, idx: usize) -> std::io::Result<Worker> {
        let (worker, join_handle) = worker::spawn(worker::SpawnArgs {
            slots: slots.clone(),
            idx,
            max_tasks: self.max_tasks_per_worker,
            thread_name_prefix: &self.thread_name_prefix,
        })?;
        self.reap_exited_threads();
        self.threads.push(join_handle);
        self.metrics.record_worker_spawned();
        Ok(worker)
    }

    /// Join the threads of retired and crashed workers that have already exited.
    ///
    /// Keeps `threads` bounded by the live workers plus those still on their way out.
    fn reap_exited_threads(&mut self) {
        let (exited, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.threads)
            .into_iter()
            .partition(|jh| jh.is_finished());
        self.threads = running;
        if exited.is_empty() {
            return;
        }
        trace!(joined = exited.len(), retained = self.threads.len(), "joining exited workers");
        for jh in exited {
            if jh.join().is_err() {
                error!(pool_id = self.id, "worker thread panicked");
            }
        }
    }

    /// Hand `assignment` to the worker in slot `idx`, spawning one if the slot is vacant.
    fn dispatch(&mut self, slots: &Slots, idx: usize, assignment: Box<dyn Assignment>) -> Deferred {
        let mut deferred = Deferred::default();
        let mut next = Some(assignment);
        while let Some(assignment) = next.take() {
            let cur = std::mem::replace(&mut self.storage[idx], Slot::Undefined);
            let worker = match cur {
                Slot::Undefined => unreachable!("implementation error"),
                Slot::Busy(_) => panic!("implementation error: dispatch to busy slot {idx}"),
                Slot::Idle(worker) => worker,
                Slot::Vacant => match self.spawn_worker(slots, idx) {
                    Ok(worker) => worker,
                    Err(e) => {
                        warn!(idx, "failed to spawn worker: {e}");
                        self.storage[idx] = Slot::Vacant;
                        deferred.rejections.push((assignment, SystemError::WorkerSpawn(e)));
                        next = self.pop_live_job(&mut deferred);
                        continue;
                    }
                },
            };
            match worker.send(assignment) {
                Ok(()) => {
                    self.storage[idx] = Slot::Busy(worker);
                    self.busy += 1;
                    debug_assert!(self.busy <= self.storage.len());
                    self.metrics.record_dispatch(self.busy);
                    trace!(idx, busy = self.busy, "dispatched job");
                    return deferred;
                }
                Err(assignment) => {
                    // the worker thread is gone; it can't have reported back, so replace it
                    warn!(idx, "worker channel closed unexpectedly, replacing worker");
                    self.storage[idx] = Slot::Vacant;
                    next = Some(assignment);
                }
            }
        }
        // nothing left to run on this slot
        self.release_idle_slot(idx);
        deferred
    }

    /// Pop the next queued job, rejecting those that were cancelled while waiting.
    fn pop_live_job(&mut self, deferred: &mut Deferred) -> Option<Box<dyn Assignment>> {
        while let Some(assignment) = self.queue.pop_front() {
            if assignment.is_cancelled() {
                trace!("dropping cancelled job from queue");
                deferred
                    .rejections
                    .push((assignment, SystemError::Cancelled));
                continue;
            }
            return Some(assignment);
        }
        None
    }

    fn return_slot(&mut self, slots: &Slots, idx: usize, disposition: Disposition) -> Deferred {
        let cur = std::mem::replace(&mut self.storage[idx], Slot::Undefined);
        let worker = match cur {
            Slot::Busy(worker) => worker,
            other => unreachable!(
                "only busy slots are returned, got {}",
                other.discriminant_str()
            ),
        };
        self.busy -= 1;
        self.metrics.record_completion();
        self.storage[idx] = match disposition {
            Disposition::Reusable => Slot::Idle(worker),
            Disposition::Retire => {
                debug!(idx, "recycling worker after reaching its assignment limit");
                self.metrics.record_worker_retired();
                drop(worker);
                Slot::Vacant
            }
            Disposition::Crashed => {
                self.metrics.record_worker_crashed();
                drop(worker);
                Slot::Vacant
            }
        };

        let mut deferred = Deferred::default();
        if let Some(next) = self.pop_live_job(&mut deferred) {
            let more = self.dispatch(slots, idx, next);
            deferred.rejections.extend(more.rejections);
            return deferred;
        }
        self.release_idle_slot(idx);
        deferred
    }

    /// Slot `idx` is not busy and there's nothing queued for it.
    fn release_idle_slot(&mut self, idx: usize) {
        match self.phase {
            Phase::Open => {
                trace!(idx, "no queued jobs, returning idx to unused_indices");
                self.unused_indices.push(idx);
            }
            Phase::Draining => {
                // dropping the worker closes its channel, which makes the thread exit
                self.storage[idx] = Slot::Vacant;
                self.maybe_drained();
            }
            Phase::Drained => unreachable!("no slot can be busy once drained"),
        }
    }

    fn set_draining(&mut self, mode: ShutdownMode) -> Deferred {
        let mut deferred = Deferred::default();
        match self.phase {
            Phase::Open => {}
            Phase::Draining | Phase::Drained => {
                trace!("shutdown already initiated");
                return deferred;
            }
        }
        debug!(pool_id = self.id, ?mode, busy = self.busy, queued = self.queue.len(), "draining");
        self.phase = Phase::Draining;
        if let ShutdownMode::Cancel = mode {
            deferred.rejections.extend(
                self.queue
                    .drain(..)
                    .map(|assignment| (assignment, SystemError::Cancelled)),
            );
        }
        for idx in std::mem::take(&mut self.unused_indices) {
            let cur = std::mem::replace(&mut self.storage[idx], Slot::Vacant);
            match cur {
                // dropping the worker closes its channel, which makes the thread exit
                Slot::Idle(_) | Slot::Vacant => {}
                other => unreachable!(
                    "unused index {idx} points to {} slot",
                    other.discriminant_str()
                ),
            }
        }
        self.maybe_drained();
        deferred
    }

    fn maybe_drained(&mut self) {
        if self.busy == 0 && self.queue.is_empty() {
            debug_assert!(self.storage.iter().all(|s| matches!(s, Slot::Vacant)));
            debug!(pool_id = self.id, "drained");
            self.phase = Phase::Drained;
            // the pool holds a receiver for its entire lifetime, but don't rely on it
            let _ = self.drained_tx.send(true);
        }
    }
}

impl Slot {
    fn discriminant_str(&self) -> &'static str {
        match self {
            Slot::Undefined => "Undefined",
            Slot::Vacant => "Vacant",
            Slot::Idle(_) => "Idle",
            Slot::Busy(_) => "Busy",
        }
    }
}
