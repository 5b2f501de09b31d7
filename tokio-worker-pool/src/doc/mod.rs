//! Longer-form writing about this crate.
//!
//! Table Of Contents:
//!
//! - [Design](`design`)

pub mod design {
    //! # Slots
    //!
    //! A [`WorkerPool`](crate::WorkerPool) owns a fixed-size table of slots, one per worker.
    //! Each slot is either `Idle`, `Busy` or `Vacant`.
    //! A `Vacant` slot has no thread behind it; the next dispatch to it spawns a fresh worker.
    //!
    //! The table is behind a single `std::sync::Mutex`. It is locked by
    //!
    //! - the submitting task, to grab an idle slot or to queue the job, and
    //! - the worker thread, to hand its slot back after the job has run.
    //!
    //! When a worker hands back its slot and the queue is non-empty, the worker hands
    //! the next job to the same slot while still holding the lock.
    //! This keeps "number of busy slots" equal to "number of jobs handed to a worker",
    //! which can never exceed the table size.
    //!
    //! # Recycling
    //!
    //! Every worker counts the jobs it ran. Once it reaches
    //! [`PoolConfig::max_tasks_per_worker`](crate::PoolConfig::max_tasks_per_worker),
    //! it reports `Retire` when handing back its slot and exits.
    //! The slot becomes `Vacant`. A job that panics makes the worker report `Crashed`,
    //! which has the same effect; the job's handle resolves to
    //! [`SystemError::WorkerCrash`](crate::SystemError::WorkerCrash).
    //!
    //! # Shutdown
    //!
    //! The table moves `Open -> Draining -> Drained`.
    //! In `Draining`, new submissions fail, idle workers get their channel closed and
    //! exit, and busy workers exit once their job is done and the queue is empty.
    //! The transition to `Drained` is published on a `tokio::sync::watch` channel that
    //! every [`WorkerPool::shutdown`](crate::WorkerPool::shutdown) caller waits on.
    //!
    //! # Cancellation
    //!
    //! Each job carries a `CancellationToken` that is a child of the pool's token.
    //! Dropping a [`JobHandle`](crate::JobHandle) cancels it.
    //! A worker that picks up a cancelled job does not run it, and a handle whose token is
    //! cancelled never resolves to success, even if the job ran to completion.
}
