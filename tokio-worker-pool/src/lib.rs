//! This crate runs blocking, CPU- or IO-heavy jobs on a bounded pool of OS threads
//! and lets vanilla `tokio` code await their results.
//!
//! # Usage
//!
//! 1. Launch a [`WorkerPool`] with a [`PoolConfig`].
//! 2. [`WorkerPool::submit`] a [`Job`]. The pool takes *ownership* of the job
//!    until it has run.
//! 3. Await the returned [`JobHandle`] to get the job's result plus the time it took
//!    on the worker thread.
//! 4. To run a known-in-advance batch of jobs and collect *every* failure instead of
//!    the first one, use a [`TaskGroup`].
//! 5. Call [`WorkerPool::shutdown`] to wait for in-flight work and join the worker threads.
//!
//! ## Example 1: Single Job
//!
//! ```rust
//! use tokio_worker_pool::{Job, PoolConfig, WorkerPool};
//!
//! struct Square(u64);
//!
//! impl Job for Square {
//!     type Id = u64;
//!     type Output = u64;
//!     type Error = std::convert::Infallible;
//!     fn id(&self) -> u64 {
//!         self.0
//!     }
//!     fn run(self) -> Result<u64, Self::Error> {
//!         Ok(self.0 * self.0)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let pool = WorkerPool::launch(PoolConfig::default()).unwrap();
//!     let completed = pool.submit(Square(7)).await.unwrap();
//!     assert_eq!(completed.value, 49);
//!     pool.shutdown().await;
//! }
//! ```
//!
//! ## Example 2: Task Group
//!
//! ```rust
//! # use tokio_worker_pool::{Job, PoolConfig, WorkerPool};
//! use tokio_worker_pool::TaskGroup;
//! # struct Square(u64);
//! # impl Job for Square {
//! #     type Id = u64;
//! #     type Output = u64;
//! #     type Error = std::convert::Infallible;
//! #     fn id(&self) -> u64 { self.0 }
//! #     fn run(self) -> Result<u64, Self::Error> { Ok(self.0 * self.0) }
//! # }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let pool = WorkerPool::launch(PoolConfig::default()).unwrap();
//!     let result = TaskGroup::new(&pool)
//!         .run((0..10).map(Square))
//!         .await
//!         .unwrap();
//!     assert!(result.is_total_success());
//!     assert_eq!(result.successes.len(), 10);
//!     pool.shutdown().await;
//! }
//! ```
//!
//! # Design
//!
//! See [`crate::doc`].

pub mod doc;

mod job;
pub mod metrics;
mod pool;
mod task_group;
#[cfg(test)]
mod test_util;
pub mod timing;

pub use job::{Completed, Job};
pub use pool::handle::{Error, JobHandle, SystemError};
pub use pool::{LaunchError, PoolConfig, ShutdownMode, WorkerPool, DEFAULT_MAX_TASKS_PER_WORKER};
pub use task_group::{AggregatedFailure, AggregatedResult, Failure, GroupCancelled, Success, TaskGroup};
