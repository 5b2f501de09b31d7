use std::{path::PathBuf, time::Duration};

use columnar_common::{CodecError, Table};
use tokio_util::sync::CancellationToken;
use tokio_worker_pool::{AggregatedFailure, Error, Failure, LaunchError};

pub(crate) mod concurrent;
pub(crate) mod sequential;

/// A strategy for reading every file of a run.
pub(crate) trait Engine {
    /// Read `files` and report what happened.
    ///
    /// Errors are reserved for failing to set up the engine itself; per-file failures
    /// are part of the [`EngineRunResult`].
    fn run(
        self: Box<Self>,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<EngineRunResult, EngineSetupError>;
}

pub(crate) struct EngineRunResult {
    /// Wall time of the whole strategy, including pool startup and shutdown.
    pub(crate) elapsed: Duration,
    pub(crate) reads: Vec<FileRead>,
    pub(crate) stop: Stop,
}

pub(crate) struct FileRead {
    pub(crate) path: PathBuf,
    pub(crate) table: Table,
    pub(crate) elapsed: Duration,
}

/// Why the engine stopped.
pub(crate) enum Stop {
    Completed,
    /// Sequential only: the first failing file ended the run. A panicking read shows
    /// up as [`tokio_worker_pool::SystemError::WorkerCrash`].
    FailFast {
        path: PathBuf,
        error: Error<CodecError>,
    },
    /// Concurrent only: every file was attempted, these ones failed.
    Aggregated(AggregatedFailure<PathBuf, CodecError>),
    /// Files that were pending when the run was cancelled, plus any that had failed before.
    Cancelled {
        failures: Vec<Failure<PathBuf, CodecError>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EngineSetupError {
    #[error("build tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("launch worker pool: {0}")]
    Launch(#[source] LaunchError),
}
