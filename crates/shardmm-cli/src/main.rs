//! shardmm command-line interface.
//!
//! Multiply two seeded random matrices on every worker, persist inputs and
//! results into shared shard files, and report timings:
//! ```sh
//! shardmm 512 512 512
//! shardmm --workers 4 --backend cpu --verify 256 128 256
//! mpirun -n 8 shardmm --mpi 1024 1024 1024   # built with --features mpi
//! ```

mod config;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;

use shardmm_core::Workload;

#[derive(Parser)]
#[command(name = "shardmm")]
#[command(about = "Distributed dense matrix multiplication benchmark")]
#[command(version)]
struct Cli {
    /// Number of rows in matrix one.
    #[arg(allow_negative_numbers = true, value_parser = parse_dimension)]
    m: usize,
    /// Number of columns in matrix one and rows in matrix two.
    #[arg(allow_negative_numbers = true, value_parser = parse_dimension)]
    n: usize,
    /// Number of columns in matrix two.
    #[arg(allow_negative_numbers = true, value_parser = parse_dimension)]
    k: usize,

    /// Path to a TOML run configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Compute backend: auto, cpu, serial or gpu (overrides config).
    #[arg(short, long)]
    backend: Option<String>,
    /// Number of in-process workers (overrides config).
    #[arg(short, long)]
    workers: Option<usize>,
    /// Directory for the shard files (overrides config).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Read every shard back after the run and check it.
    #[arg(long)]
    verify: bool,
    /// Write timing.json next to the shard files.
    #[arg(long)]
    json: bool,
    /// Run as one rank of an MPI job instead of spawning workers.
    #[cfg(feature = "mpi")]
    #[arg(long)]
    mpi: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return argument_error(e),
    };

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let workload = Workload::new(cli.m, cli.n, cli.k).context("Invalid matrix dimensions")?;
    let file_config = match &cli.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => config::RunConfig::default(),
    };

    let settings = runner::Settings {
        workload,
        backend: cli.backend.unwrap_or(file_config.run.backend),
        workers: cli.workers.unwrap_or(file_config.run.workers),
        output_dir: cli.output_dir.unwrap_or(file_config.output.directory),
        print_limit: file_config.output.print_limit,
        frequency_hz: file_config.timer.frequency_hz,
        verify: cli.verify,
        save_json: cli.json || file_config.output.save_json,
    };
    log::debug!("{:?}", settings);

    #[cfg(feature = "mpi")]
    if cli.mpi {
        return runner::run_mpi(&settings);
    }
    runner::run_local(&settings)
}

/// Parse a matrix dimension. Negative values are taken as values, not flags,
/// so they are reported as bad dimensions rather than a wrong argument count.
fn parse_dimension(value: &str) -> Result<usize, String> {
    match value.trim().parse::<i64>() {
        Ok(v) if v > 0 => usize::try_from(v).map_err(|e| e.to_string()),
        Ok(_) => Err("must be a positive integer".into()),
        Err(e) => Err(format!("must be a positive integer ({})", e)),
    }
}

/// Report a command-line error and exit with status 1.
///
/// Help and version requests exit normally. Under a launcher only rank 0
/// prints, so the message appears once.
fn argument_error(err: clap::Error) -> ExitCode {
    if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
        err.exit();
    }
    if !is_leader_process() {
        return ExitCode::FAILURE;
    }

    match err.kind() {
        ErrorKind::MissingRequiredArgument
        | ErrorKind::UnknownArgument
        | ErrorKind::TooManyValues
        | ErrorKind::WrongNumberOfValues => {
            let program = std::env::args()
                .next()
                .unwrap_or_else(|| "shardmm".into());
            println!("Incorrect number of arguments. Usage: {} <m> <n> <k>", program);
            println!("m: number of rows in matrix one");
            println!("n: number of columns in matrix one and rows in matrix two");
            println!("k: number of columns in matrix two");
        }
        _ => {
            // Printing to a closed stream is not worth a second error.
            let _ = err.print();
        }
    }
    ExitCode::FAILURE
}

/// Whether this process is rank 0 of a launcher job, judged from the
/// environment variables common MPI launchers set. Standalone runs are leaders.
fn is_leader_process() -> bool {
    ["OMPI_COMM_WORLD_RANK", "PMI_RANK", "PMIX_RANK", "SLURM_PROCID"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .map_or(true, |rank| rank.trim() == "0")
}
