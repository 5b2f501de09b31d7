//! The blocking units of work that run on the worker pool.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use columnar_common::{arrow::datatypes::Schema, CodecError, Table};
use rand::Rng;
use tokio_worker_pool::{timing::timed_sync, Job};
use tracing::info;

/// How a single file gets decoded. Tests swap in their own.
pub(crate) type ReadOp = fn(&Path) -> Result<Table, CodecError>;

/// Read one file.
pub(crate) struct WorkUnit {
    pub(crate) path: PathBuf,
    pub(crate) op: ReadOp,
}

impl Job for WorkUnit {
    type Id = PathBuf;
    type Output = Table;
    type Error = CodecError;

    fn id(&self) -> PathBuf {
        self.path.clone()
    }

    fn run(self) -> Result<Table, CodecError> {
        timed_sync("read_file", &self.path, || (self.op)(&self.path))
    }
}

/// Generate one file of uniformly random values in `[0, 1)`.
pub(crate) struct WriteUnit {
    pub(crate) idx: usize,
    pub(crate) path: PathBuf,
    pub(crate) schema: Arc<Schema>,
    pub(crate) num_records: usize,
}

impl Job for WriteUnit {
    type Id = PathBuf;
    type Output = ();
    type Error = CodecError;

    fn id(&self) -> PathBuf {
        self.path.clone()
    }

    fn run(self) -> Result<(), CodecError> {
        if self.idx % 10 == 0 {
            info!(path = %self.path.display(), "generating file");
        }
        let ndim = self.schema.fields().len();
        let mut rng = rand::thread_rng();
        let rows: Vec<Vec<f64>> = (0..self.num_records)
            .map(|_| (0..ndim).map(|_| rng.gen::<f64>()).collect())
            .collect();
        columnar_common::write(&self.path, &self.schema, &rows)
    }
}
