use std::{fmt::Debug, time::Duration};

/// A unit of blocking work and the inputs it operates on.
///
/// The pool takes ownership of the job on [`WorkerPool::submit`](crate::WorkerPool::submit)
/// and hands it to exactly one worker thread, which calls [`Job::run`] at most once.
pub trait Job: Sized + Send + 'static {
    /// Identity of the job, reported back next to failures by the [`TaskGroup`](crate::TaskGroup).
    type Id: Clone + Debug + Send + 'static;
    type Output: Send + 'static;
    type Error: Send + 'static;

    fn id(&self) -> Self::Id;

    /// Runs on a worker thread. Blocking is fine here, that's the point.
    fn run(self) -> Result<Self::Output, Self::Error>;
}

/// The successful result of a job, along with the wall time it spent running on its worker.
#[derive(Debug)]
pub struct Completed<T> {
    pub value: T,
    pub elapsed: Duration,
}
