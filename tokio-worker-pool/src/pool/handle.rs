//! The future returned by [`WorkerPool::submit`](crate::WorkerPool::submit) and the
//! type-erased job envelope that travels to the worker thread.

use std::{
    any::Any,
    fmt::Display,
    panic::AssertUnwindSafe,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::job::{Completed, Job};

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("shutting down")]
    PoolShuttingDown,
    #[error("cancelled")]
    Cancelled,
    #[error("worker crashed: {0}")]
    WorkerCrash(String),
    #[error("spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl SystemError {
    /// The error for a job that panicked with `payload`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> SystemError {
        SystemError::WorkerCrash(panic_message(payload))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error<T> {
    System(SystemError),
    Job(T),
}

impl<T: Display> Display for Error<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::System(e) => {
                if f.alternate() {
                    write!(f, "tokio-worker-pool: {e:#}")
                } else {
                    write!(f, "tokio-worker-pool: {e}")
                }
            }
            Error::Job(job) => Display::fmt(job, f),
        }
    }
}

impl<T> Error<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::System(SystemError::Cancelled))
    }
}

type JobResult<J> = Result<Completed<<J as Job>::Output>, Error<<J as Job>::Error>>;

/// What happened when a worker picked up an [`Assignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Ran,
    SkippedCancelled,
    Panicked,
}

/// A [`Job`] with its result channel, type-erased so that a single pool can run any job type.
pub(crate) trait Assignment: Send + 'static {
    fn is_cancelled(&self) -> bool;
    /// Runs the job on the current thread and delivers the result. Never unwinds.
    fn run(self: Box<Self>) -> RunOutcome;
    /// Delivers `err` without running the job.
    fn reject(self: Box<Self>, err: SystemError);
}

pub(crate) struct JobAssignment<J: Job> {
    job: J,
    result_tx: oneshot::Sender<JobResult<J>>,
    cancel: CancellationToken,
}

impl<J: Job> JobAssignment<J> {
    pub(crate) fn new(job: J, cancel: CancellationToken) -> (Self, JobHandle<J::Output, J::Error>) {
        let (result_tx, result_rx) = oneshot::channel();
        let handle = JobHandle {
            result_rx,
            cancel: cancel.clone(),
        };
        (
            JobAssignment {
                job,
                result_tx,
                cancel,
            },
            handle,
        )
    }
}

impl<J: Job> Assignment for JobAssignment<J> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.result_tx.is_closed()
    }

    fn run(self: Box<Self>) -> RunOutcome {
        if self.is_cancelled() {
            self.reject(SystemError::Cancelled);
            return RunOutcome::SkippedCancelled;
        }
        let JobAssignment { job, result_tx, .. } = *self;
        let start = Instant::now();
        match std::panic::catch_unwind(AssertUnwindSafe(move || job.run())) {
            Ok(res) => {
                let elapsed = start.elapsed();
                let res = res
                    .map(|value| Completed { value, elapsed })
                    .map_err(Error::Job);
                // receiver may be gone; the handle got dropped while we were running
                let _ = result_tx.send(res);
                RunOutcome::Ran
            }
            Err(payload) => {
                let err = SystemError::from_panic(&*payload);
                error!(%err, "job panicked, worker is going down");
                let _ = result_tx.send(Err(Error::System(err)));
                RunOutcome::Panicked
            }
        }
    }

    fn reject(self: Box<Self>, err: SystemError) {
        trace!(%err, "rejecting job");
        let _ = self.result_tx.send(Err(Error::System(err)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

/// Awaitable handle to a submitted job.
///
/// Resolves to the job's [`Completed`] result, the job's own error as [`Error::Job`],
/// or a pool-level [`Error::System`].
///
/// Dropping the handle cancels the job: if it hasn't started yet, it never will.
/// A cancelled handle never resolves to `Ok`.
pub struct JobHandle<T, E> {
    result_rx: oneshot::Receiver<Result<Completed<T>, Error<E>>>,
    cancel: CancellationToken,
}

impl<T, E> JobHandle<T, E> {
    /// Request cancellation. The handle still needs to be awaited to observe the terminal state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T, E> std::future::Future for JobHandle<T, E> {
    type Output = Result<Completed<T>, Error<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = match ready!(self.result_rx.poll_unpin(cx)) {
            Ok(res) => res,
            Err(_) => Err(Error::System(SystemError::WorkerCrash(
                "worker went away without reporting a result".to_owned(),
            ))),
        };
        match res {
            Ok(_) if self.cancel.is_cancelled() => {
                Poll::Ready(Err(Error::System(SystemError::Cancelled)))
            }
            res => Poll::Ready(res),
        }
    }
}

impl<T, E> Drop for JobHandle<T, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
