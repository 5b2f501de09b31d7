//! The OS thread behind a slot.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
    thread::JoinHandle,
};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::{
    handle::{Assignment, RunOutcome},
    slots::{Disposition, Slots},
};

static WORKER_ID: AtomicUsize = AtomicUsize::new(0);

/// The pool's end of a worker thread. Dropping it closes the channel, which makes
/// the thread exit after its current job.
pub(crate) struct Worker {
    id: usize,
    tx: mpsc::UnboundedSender<Box<dyn Assignment>>,
}

impl Worker {
    pub(crate) fn send(&self, assignment: Box<dyn Assignment>) -> Result<(), Box<dyn Assignment>> {
        trace!(worker_id = self.id, "sending job to worker");
        self.tx.send(assignment).map_err(|mpsc::error::SendError(a)| a)
    }
}

pub(crate) struct SpawnArgs<'a> {
    pub(crate) slots: Slots,
    pub(crate) idx: usize,
    pub(crate) max_tasks: Option<NonZeroUsize>,
    pub(crate) thread_name_prefix: &'a str,
}

pub(crate) fn spawn(args: SpawnArgs<'_>) -> std::io::Result<(Worker, JoinHandle<()>)> {
    let SpawnArgs {
        slots,
        idx,
        max_tasks,
        thread_name_prefix,
    } = args;
    let id = WORKER_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    let join_handle = std::thread::Builder::new()
        .name(format!("{thread_name_prefix}-{id}"))
        .spawn(move || worker_main(id, idx, rx, slots, max_tasks))?;
    debug!(worker_id = id, idx, "spawned worker");
    Ok((Worker { id, tx }, join_handle))
}

fn worker_main(
    id: usize,
    idx: usize,
    mut rx: mpsc::UnboundedReceiver<Box<dyn Assignment>>,
    slots: Slots,
    max_tasks: Option<NonZeroUsize>,
) {
    scopeguard::defer_on_success! {debug!(worker_id = id, idx, "worker exiting")};
    scopeguard::defer_on_unwind! {error!(worker_id = id, idx, "worker panicked outside of a job")};

    let mut assignments = 0usize;
    while let Some(assignment) = rx.blocking_recv() {
        assignments += 1;
        let disposition = match assignment.run() {
            RunOutcome::Panicked => Disposition::Crashed,
            RunOutcome::Ran | RunOutcome::SkippedCancelled => match max_tasks {
                Some(max) if assignments >= max.get() => Disposition::Retire,
                _ => Disposition::Reusable,
            },
        };
        slots.return_slot(idx, disposition);
        match disposition {
            Disposition::Reusable => continue,
            Disposition::Retire | Disposition::Crashed => break,
        }
    }
}
