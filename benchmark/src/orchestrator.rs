//! Runs one benchmark: enumerate the input files, read them with the chosen strategy,
//! and turn whatever happened into a [`BenchmarkReport`].

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use columnar_common::{CodecError, Table};
use hdrhistogram::Histogram;
use itertools::Itertools;
use serde_with::serde_as;
use tokio_util::sync::CancellationToken;
use tokio_worker_pool::{AggregatedFailure, PoolConfig, ShutdownMode, DEFAULT_MAX_TASKS_PER_WORKER};
use tracing::{info, warn};

use crate::{
    engines::{
        concurrent::EngineConcurrent, sequential::EngineSequential, Engine, EngineRunResult,
        EngineSetupError, FileRead, Stop,
    },
    work::ReadOp,
};

pub(crate) const DEFAULT_POOL_SIZE: usize = 7;

const INPUT_EXTENSION: &str = "parquet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Strategy {
    #[value(alias = "v1")]
    Sequential,
    #[value(alias = "v2")]
    Concurrent,
}

#[derive(Clone)]
pub(crate) struct RunConfig {
    pub(crate) pool_size: NonZeroUsize,
    pub(crate) max_tasks_per_worker: Option<NonZeroUsize>,
    pub(crate) read_op: ReadOp,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            pool_size: NonZeroUsize::new(DEFAULT_POOL_SIZE).unwrap(),
            max_tasks_per_worker: NonZeroUsize::new(DEFAULT_MAX_TASKS_PER_WORKER),
            read_op: columnar_common::read,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct FailureRecord {
    pub(crate) path: PathBuf,
    pub(crate) error: String,
}

const LATENCY_PERCENTILES: [f64; 3] = [50.0, 90.0, 99.0];

fn latency_percentiles_serialize<S>(
    values: &[f64; LATENCY_PERCENTILES.len()],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde::Serialize::serialize(
        &LATENCY_PERCENTILES
            .iter()
            .map(|p| format!("p{p}"))
            .zip(values.iter().cloned())
            .collect::<HashMap<_, _>>(),
        serializer,
    )
}

/// Per-file read latency, in milliseconds.
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct LatencySummary {
    pub(crate) latency_min_ms: f64,
    pub(crate) latency_mean_ms: f64,
    pub(crate) latency_max_ms: f64,
    #[serde(serialize_with = "latency_percentiles_serialize")]
    pub(crate) latency_percentiles: [f64; LATENCY_PERCENTILES.len()],
}

impl LatencySummary {
    fn from_latencies(latencies: impl IntoIterator<Item = Duration>) -> Option<Self> {
        // microsecond resolution, up to one hour per file
        let mut histo = Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3).ok()?;
        for latency in latencies {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            histo.saturating_record(micros.max(1));
        }
        if histo.len() == 0 {
            return None;
        }
        Some(LatencySummary {
            latency_min_ms: histo.min() as f64 / 1000.0,
            latency_mean_ms: histo.mean() / 1000.0,
            latency_max_ms: histo.max() as f64 / 1000.0,
            latency_percentiles: {
                let mut values = [0.0; LATENCY_PERCENTILES.len()];
                for (i, value_ref) in values.iter_mut().enumerate() {
                    *value_ref = histo.value_at_percentile(LATENCY_PERCENTILES[i]) as f64 / 1000.0;
                }
                values
            },
        })
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LAT(ms): min={:.3} mean={:.3} max={:.3} {}",
            self.latency_min_ms,
            self.latency_mean_ms,
            self.latency_max_ms,
            self.latency_percentiles
                .iter()
                .zip(LATENCY_PERCENTILES.iter())
                .map(|(v, p)| format!("p{p}={v:.3}"))
                .join(" "),
        )
    }
}

/// Outcome of one run. Built once at the end of the run, never modified afterwards.
#[serde_as]
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct BenchmarkReport {
    pub(crate) strategy: Strategy,
    #[serde_as(as = "serde_with::DurationMicroSeconds")]
    pub(crate) elapsed_us: Duration,
    pub(crate) files_total: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) failures: Vec<FailureRecord>,
    pub(crate) rows_read: usize,
    pub(crate) read_latency: Option<LatencySummary>,
}

impl BenchmarkReport {
    fn nothing_read(strategy: Strategy, files_total: usize) -> Self {
        BenchmarkReport {
            strategy,
            elapsed_us: Duration::ZERO,
            files_total,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            rows_read: 0,
            read_latency: None,
        }
    }
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // sub-millisecond digits are noise at this scale
        let elapsed =
            Duration::from_millis(u64::try_from(self.elapsed_us.as_millis()).unwrap_or(u64::MAX));
        write!(
            f,
            "strategy={:?} elapsed={} files={} succeeded={} failed={} rows={}",
            self.strategy,
            humantime::format_duration(elapsed),
            self.files_total,
            self.succeeded,
            self.failed,
            self.rows_read,
        )?;
        if let Some(latency) = &self.read_latency {
            write!(f, " {latency}")?;
        }
        for failure in &self.failures {
            write!(f, "\n  failed {}: {}", failure.path.display(), failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RunError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("{source}")]
    Setup {
        #[source]
        source: EngineSetupError,
        report: BenchmarkReport,
    },
    #[error("stopped at the first failure: {source}")]
    FailFast {
        #[source]
        source: tokio_worker_pool::Error<CodecError>,
        report: BenchmarkReport,
    },
    #[error("{failure}")]
    Aggregated {
        failure: AggregatedFailure<PathBuf, CodecError>,
        report: BenchmarkReport,
    },
    #[error("cancelled")]
    Cancelled { report: BenchmarkReport },
}

impl RunError {
    pub(crate) fn report(&self) -> Option<&BenchmarkReport> {
        match self {
            RunError::Configuration(_) => None,
            RunError::Setup { report, .. }
            | RunError::FailFast { report, .. }
            | RunError::Aggregated { report, .. }
            | RunError::Cancelled { report } => Some(report),
        }
    }
}

/// Regular files with the input extension directly inside `dir`, in lexicographic order.
pub(crate) fn enumerate(dir: &Path) -> Result<Vec<PathBuf>, RunError> {
    let config_err = |e: std::io::Error| RunError::Configuration(format!("{}: {e}", dir.display()));
    if !dir.is_dir() {
        return Err(RunError::Configuration(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(config_err)? {
        let path = entry.map_err(config_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == INPUT_EXTENSION) {
            files.push(path);
        }
    }
    Ok(files.into_iter().sorted().collect())
}

fn setup_engine(strategy: Strategy, config: &RunConfig) -> Box<dyn Engine> {
    match strategy {
        Strategy::Sequential => Box::new(EngineSequential::new(config.read_op)),
        Strategy::Concurrent => Box::new(EngineConcurrent::new(
            PoolConfig {
                pool_size: config.pool_size,
                max_tasks_per_worker: config.max_tasks_per_worker,
                shutdown_mode: ShutdownMode::Cancel,
                thread_name_prefix: "reader".to_owned(),
            },
            config.read_op,
        )),
    }
}

pub(crate) fn run(
    strategy: Strategy,
    dir: &Path,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<BenchmarkReport, RunError> {
    let files = enumerate(dir)?;
    let files_total = files.len();
    info!(?strategy, files_total, dir = %dir.display(), "starting benchmark");

    let engine = setup_engine(strategy, config);
    let EngineRunResult {
        elapsed,
        reads,
        stop,
    } = engine
        .run(files, cancel)
        .map_err(|source| RunError::Setup {
            source,
            report: BenchmarkReport::nothing_read(strategy, files_total),
        })?;

    let reads: Vec<FileRead> = reads
        .into_iter()
        .sorted_by(|a, b| a.path.cmp(&b.path))
        .collect();
    let read_latency = LatencySummary::from_latencies(reads.iter().map(|r| r.elapsed));
    let succeeded = reads.len();
    let rows_read = combine(reads.into_iter().map(|r| r.table));

    let failures: Vec<FailureRecord> = match &stop {
        Stop::Completed => Vec::new(),
        Stop::FailFast { path, error } => vec![FailureRecord {
            path: path.clone(),
            error: error.to_string(),
        }],
        Stop::Aggregated(AggregatedFailure { failures }) | Stop::Cancelled { failures } => failures
            .iter()
            .map(|f| FailureRecord {
                path: f.id.clone(),
                error: f.error.to_string(),
            })
            .sorted_by(|a, b| a.path.cmp(&b.path))
            .collect(),
    };
    let report = BenchmarkReport {
        strategy,
        elapsed_us: elapsed,
        files_total,
        succeeded,
        failed: failures.len(),
        failures,
        rows_read,
        read_latency,
    };

    match stop {
        Stop::Completed => Ok(report),
        Stop::FailFast { error, .. } => Err(RunError::FailFast {
            source: error,
            report,
        }),
        Stop::Aggregated(failure) => Err(RunError::Aggregated { failure, report }),
        Stop::Cancelled { .. } => Err(RunError::Cancelled { report }),
    }
}

/// Stack all decoded tables into one and return its row count.
fn combine(tables: impl Iterator<Item = Table>) -> usize {
    let tables: Vec<Table> = tables.collect();
    let nfiles = tables.len();
    let per_table_rows: usize = tables.iter().map(Table::num_rows).sum();
    match Table::concat(tables) {
        Ok(Some(all)) => {
            info!("read {nfiles} files, {} records", all.num_rows());
            all.num_rows()
        }
        Ok(None) => {
            info!("read 0 files, 0 records");
            0
        }
        Err(e) => {
            warn!("files have different schemas, not combining them: {e}");
            info!("read {nfiles} files, {per_table_rows} records");
            per_table_rows
        }
    }
}
