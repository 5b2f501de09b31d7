//! Run a batch of jobs on a [`WorkerPool`] and collect every outcome.
//!
//! Unlike awaiting handles one by one with `?`, a [`TaskGroup`] never stops at the first
//! failure: [`TaskGroup::run`] returns only once every job is terminal, with all
//! successes and all failures in one [`AggregatedResult`].

use std::{fmt, time::Duration};

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Job, SystemError, WorkerPool};

pub struct TaskGroup<'p> {
    pool: &'p WorkerPool,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct Success<Id, T> {
    pub id: Id,
    pub value: T,
    /// Time the job spent running on its worker.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Failure<Id, E> {
    pub id: Id,
    pub error: Error<E>,
}

#[derive(Debug)]
pub struct AggregatedResult<Id, T, E> {
    pub successes: Vec<Success<Id, T>>,
    pub failures: Vec<Failure<Id, E>>,
}

/// Every failure of a group run, none left out.
#[derive(Debug)]
pub struct AggregatedFailure<Id, E> {
    pub failures: Vec<Failure<Id, E>>,
}

/// The group was cancelled before all jobs were terminal.
///
/// `partial` holds the successes collected before cancellation was observed; jobs that were
/// still pending at that point are in `partial.failures`, mostly as
/// [`SystemError::Cancelled`].
#[derive(Debug)]
pub struct GroupCancelled<Id, T, E> {
    pub pending: usize,
    pub partial: AggregatedResult<Id, T, E>,
}

impl<'p> TaskGroup<'p> {
    pub fn new(pool: &'p WorkerPool) -> Self {
        Self::with_cancellation(pool, CancellationToken::new())
    }

    pub fn with_cancellation(pool: &'p WorkerPool, cancel: CancellationToken) -> Self {
        TaskGroup { pool, cancel }
    }

    /// Submit all `jobs` and wait until each one has succeeded or failed.
    ///
    /// Completion order is unspecified. Dropping the returned future cancels every job
    /// that hasn't completed yet.
    pub async fn run<J, I>(
        &self,
        jobs: I,
    ) -> Result<AggregatedResult<J::Id, J::Output, J::Error>, GroupCancelled<J::Id, J::Output, J::Error>>
    where
        J: Job,
        I: IntoIterator<Item = J>,
    {
        let mut tokens = Vec::new();
        let mut pending = FuturesUnordered::new();
        for job in jobs {
            let id = job.id();
            let handle = self.pool.submit(job);
            tokens.push(handle.cancellation_token());
            pending.push(handle.map(move |res| (id, res)));
        }
        let submitted = pending.len();
        debug!(submitted, "task group submitted all jobs");

        let mut result = AggregatedResult {
            successes: Vec::with_capacity(submitted),
            failures: Vec::new(),
        };
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = pending.next() => match next {
                    Some((id, res)) => result.record(id, res),
                    None => {
                        debug!(
                            succeeded = result.successes.len(),
                            failed = result.failures.len(),
                            "task group done"
                        );
                        return Ok(result);
                    }
                },
            }
        }

        let still_pending = pending.len();
        info!(still_pending, "task group cancelled, cancelling outstanding jobs");
        for token in &tokens {
            token.cancel();
        }
        // wait for every job to become terminal so nothing keeps running behind our back
        while let Some((id, res)) = pending.next().await {
            let error = match res {
                Ok(_) => Error::System(SystemError::Cancelled),
                Err(e) => e,
            };
            result.failures.push(Failure { id, error });
        }
        Err(GroupCancelled {
            pending: still_pending,
            partial: result,
        })
    }
}

impl<Id, T, E> AggregatedResult<Id, T, E> {
    fn record(&mut self, id: Id, res: Result<crate::Completed<T>, Error<E>>) {
        match res {
            Ok(completed) => self.successes.push(Success {
                id,
                value: completed.value,
                elapsed: completed.elapsed,
            }),
            Err(error) => self.failures.push(Failure { id, error }),
        }
    }

    pub fn is_total_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of jobs that were run as part of the group.
    pub fn submitted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn split(self) -> (Vec<Success<Id, T>>, Option<AggregatedFailure<Id, E>>) {
        let AggregatedResult {
            successes,
            failures,
        } = self;
        let failure = if failures.is_empty() {
            None
        } else {
            Some(AggregatedFailure { failures })
        };
        (successes, failure)
    }
}

impl<Id: fmt::Debug, E: fmt::Display> fmt::Display for Failure<Id, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.id, self.error)
    }
}

impl<Id: fmt::Debug, E: fmt::Display> fmt::Display for AggregatedFailure<Id, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl<Id: fmt::Debug, E: fmt::Display + fmt::Debug> std::error::Error for AggregatedFailure<Id, E> {}

impl<Id, T, E> fmt::Display for GroupCancelled<Id, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task group cancelled with {} job(s) pending, {} succeeded before",
            self.pending,
            self.partial.successes.len()
        )
    }
}

impl<Id: fmt::Debug, T: fmt::Debug, E: fmt::Debug> std::error::Error for GroupCancelled<Id, T, E> {}
