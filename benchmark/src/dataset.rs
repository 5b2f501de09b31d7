//! Generates the files the benchmark reads.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use columnar_common::{numeric_schema, CodecError};
use tokio_util::sync::CancellationToken;
use tokio_worker_pool::{
    timing::timed, AggregatedFailure, LaunchError, PoolConfig, ShutdownMode, TaskGroup, WorkerPool,
};
use tracing::info;

use crate::work::WriteUnit;

#[derive(Debug, Clone)]
pub(crate) struct InitConfig {
    pub(crate) num_files: usize,
    pub(crate) num_records: usize,
    pub(crate) ndim: NonZeroUsize,
    pub(crate) save_dir: PathBuf,
    /// Files written concurrently.
    pub(crate) jobs: NonZeroUsize,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InitError {
    #[error("create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("build tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("launch worker pool: {0}")]
    Launch(#[source] LaunchError),
    #[error("{0}")]
    Write(AggregatedFailure<PathBuf, CodecError>),
    #[error("cancelled, {written} of {total} files written")]
    Cancelled { written: usize, total: usize },
}

pub(crate) fn file_path(save_dir: &Path, idx: usize) -> PathBuf {
    save_dir.join(format!("{idx:05}.parquet"))
}

/// Write `num_files` files of `num_records` random rows each into `save_dir`.
///
/// Existing files with the same names are overwritten, so running this twice with the
/// same config leaves the same file set behind.
pub(crate) fn init(config: &InitConfig, cancel: &CancellationToken) -> Result<(), InitError> {
    std::fs::create_dir_all(&config.save_dir).map_err(|source| InitError::CreateDir {
        path: config.save_dir.clone(),
        source,
    })?;
    let schema = Arc::new(numeric_schema(config.ndim.get()));
    let units = (0..config.num_files).map(|idx| WriteUnit {
        idx,
        path: file_path(&config.save_dir, idx),
        schema: Arc::clone(&schema),
        num_records: config.num_records,
    });

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(InitError::Runtime)?;
    let res = rt.block_on(timed("init", config, async {
        let pool = WorkerPool::launch(PoolConfig {
            pool_size: config.jobs,
            max_tasks_per_worker: None,
            shutdown_mode: ShutdownMode::Cancel,
            thread_name_prefix: "writer".to_owned(),
        })
        .map_err(InitError::Launch)?;
        let res = TaskGroup::with_cancellation(&pool, cancel.clone())
            .run(units)
            .await;
        pool.shutdown().await;
        Ok::<_, InitError>(res)
    }))?;

    match res {
        Ok(result) => {
            let written = result.successes.len();
            if let (_, Some(failure)) = result.split() {
                return Err(InitError::Write(failure));
            }
            info!(written, save_dir = %config.save_dir.display(), "dataset ready");
            Ok(())
        }
        Err(cancelled) => Err(InitError::Cancelled {
            written: cancelled.partial.successes.len(),
            total: config.num_files,
        }),
    }
}
