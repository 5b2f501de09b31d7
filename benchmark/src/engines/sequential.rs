use std::{panic::AssertUnwindSafe, path::PathBuf};

use tokio_util::sync::CancellationToken;
use tokio_worker_pool::{timing::measure_sync, Error, SystemError};
use tracing::{info, warn};

use super::{Engine, EngineRunResult, EngineSetupError, FileRead, Stop};
use crate::work::ReadOp;

/// Reads files one after another on the calling thread, stopping at the first failure.
pub(crate) struct EngineSequential {
    op: ReadOp,
}

impl EngineSequential {
    pub(crate) fn new(op: ReadOp) -> Self {
        EngineSequential { op }
    }
}

impl Engine for EngineSequential {
    fn run(
        self: Box<Self>,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<EngineRunResult, EngineSetupError> {
        let op = self.op;
        let ((reads, stop), elapsed) = measure_sync("sequential_read", &files.len(), || {
            let mut reads = Vec::with_capacity(files.len());
            for path in files {
                if cancel.is_cancelled() {
                    info!(done = reads.len(), "cancelled, not reading any more files");
                    return (reads, Stop::Cancelled { failures: Vec::new() });
                }
                let (res, elapsed) = measure_sync("read_file", &path, || {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| op(&path))) {
                        Ok(res) => res.map_err(Error::Job),
                        Err(payload) => Err(Error::System(SystemError::from_panic(&*payload))),
                    }
                });
                match res {
                    Ok(table) => reads.push(FileRead {
                        path,
                        table,
                        elapsed,
                    }),
                    Err(error) => {
                        warn!(path = %path.display(), "{error}, aborting");
                        return (reads, Stop::FailFast { path, error });
                    }
                }
            }
            (reads, Stop::Completed)
        });
        Ok(EngineRunResult {
            elapsed,
            reads,
            stop,
        })
    }
}
