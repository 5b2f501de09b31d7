use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tokio_worker_pool::{timing::measure, GroupCancelled, PoolConfig, TaskGroup, WorkerPool};
use tracing::info;

use super::{Engine, EngineRunResult, EngineSetupError, FileRead, Stop};
use crate::work::{ReadOp, WorkUnit};

/// Fans reads out to a [`WorkerPool`] as one [`TaskGroup`], driven by a current-thread runtime.
pub(crate) struct EngineConcurrent {
    pool_config: PoolConfig,
    op: ReadOp,
}

impl EngineConcurrent {
    pub(crate) fn new(pool_config: PoolConfig, op: ReadOp) -> Self {
        EngineConcurrent { pool_config, op }
    }
}

impl Engine for EngineConcurrent {
    fn run(
        self: Box<Self>,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<EngineRunResult, EngineSetupError> {
        let EngineConcurrent { pool_config, op } = *self;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(EngineSetupError::Runtime)?;

        let (res, elapsed) = rt.block_on(measure("concurrent_read", &files.len(), async {
            let pool = WorkerPool::launch(pool_config).map_err(EngineSetupError::Launch)?;
            let units = files.into_iter().map(|path| WorkUnit { path, op });
            let res = TaskGroup::with_cancellation(&pool, cancel.clone())
                .run(units)
                .await;
            pool.shutdown().await;
            Ok::<_, EngineSetupError>(res)
        }));

        let (successes, stop) = match res? {
            Ok(result) => {
                let (successes, failure) = result.split();
                let stop = match failure {
                    None => Stop::Completed,
                    Some(failure) => Stop::Aggregated(failure),
                };
                (successes, stop)
            }
            Err(GroupCancelled { pending, partial }) => {
                info!(pending, "read group cancelled");
                (
                    partial.successes,
                    Stop::Cancelled {
                        failures: partial.failures,
                    },
                )
            }
        };
        let reads = successes
            .into_iter()
            .map(|s| FileRead {
                path: s.id,
                table: s.value,
                elapsed: s.elapsed,
            })
            .collect();
        Ok(EngineRunResult {
            elapsed,
            reads,
            stop,
        })
    }
}
