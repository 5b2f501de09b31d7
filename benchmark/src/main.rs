use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode};

use clap::Parser;
use dataset::{InitConfig, InitError};
use orchestrator::{BenchmarkReport, RunConfig, RunError, Strategy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod dataset;
mod engines;
mod orchestrator;
mod work;

#[derive(serde::Serialize, clap::Parser, Clone)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, clap::Subcommand, serde::Serialize)]
enum Command {
    /// Generate the files to benchmark against.
    Init(InitArgs),
    /// Read every file in a directory with one strategy and report how long it took.
    Run(RunArgs),
}

#[derive(Clone, clap::Args, serde::Serialize)]
struct InitArgs {
    #[clap(long, default_value_t = 300)]
    num_files: usize,
    #[clap(long, default_value_t = 10_000)]
    num_records: usize,
    #[clap(long, default_value = "768")]
    ndim: NonZeroUsize,
    #[clap(long, default_value = "./data")]
    save_dir: PathBuf,
    /// Number of files written concurrently.
    #[clap(long, default_value = "7")]
    jobs: NonZeroUsize,
}

#[derive(Clone, clap::Args, serde::Serialize)]
struct RunArgs {
    #[clap(long, value_enum, default_value = "sequential")]
    strategy: Strategy,
    #[clap(long, default_value = "./data")]
    save_dir: PathBuf,
    /// Worker threads of the concurrent strategy.
    #[clap(long, default_value = "7")]
    pool_size: NonZeroUsize,
    /// Replace a worker thread after this many files. 0 keeps workers for the whole run.
    #[clap(long, default_value_t = 5)]
    max_tasks_per_worker: usize,
    /// Print the report as JSON instead of a single line.
    #[clap(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter({
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        })
        .init();

    let args = Args::parse();
    match serde_json::to_string(&args) {
        Ok(json) => info!("args: {json}"),
        Err(e) => warn!("cannot render args as json: {e}"),
    }

    let cancel = CancellationToken::new();
    let handler_res = ctrlc::set_handler({
        let cancel = cancel.clone();
        move || {
            if cancel.is_cancelled() {
                error!("second ctrl-c, aborting");
                std::process::abort();
            }
            info!("first ctrl-c, cancelling");
            cancel.cancel();
        }
    });
    if let Err(e) = handler_res {
        warn!("cannot install ctrl-c handler, the run can't be cancelled: {e}");
    }

    match args.command {
        Command::Init(args) => {
            let config = InitConfig {
                num_files: args.num_files,
                num_records: args.num_records,
                ndim: args.ndim,
                save_dir: args.save_dir,
                jobs: args.jobs,
            };
            let res = dataset::init(&config, &cancel);
            if let Err(e) = &res {
                error!("init failed: {e}");
            }
            ExitCode::from(init_exit_code(&res))
        }
        Command::Run(args) => {
            let config = RunConfig {
                pool_size: args.pool_size,
                max_tasks_per_worker: NonZeroUsize::new(args.max_tasks_per_worker),
                ..Default::default()
            };
            let res = orchestrator::run(args.strategy, &args.save_dir, &config, &cancel);
            let report = match &res {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("run failed: {e}");
                    e.report()
                }
            };
            if let Some(report) = report {
                print_report(report, args.json);
            }
            ExitCode::from(run_exit_code(&res))
        }
    }
}

fn print_report(report: &BenchmarkReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{s}"),
            Err(e) => error!("cannot render report as json: {e}"),
        }
    } else {
        println!("{report}");
    }
}

fn run_exit_code(res: &Result<BenchmarkReport, RunError>) -> u8 {
    match res {
        Ok(_) => 0,
        Err(RunError::Configuration(_)) => 2,
        Err(
            RunError::Setup { .. }
            | RunError::FailFast { .. }
            | RunError::Aggregated { .. }
            | RunError::Cancelled { .. },
        ) => 1,
    }
}

fn init_exit_code(res: &Result<(), InitError>) -> u8 {
    match res {
        Ok(()) => 0,
        Err(InitError::CreateDir { .. }) => 2,
        Err(
            InitError::Runtime(_)
            | InitError::Launch(_)
            | InitError::Write(_)
            | InitError::Cancelled { .. },
        ) => 1,
    }
}
