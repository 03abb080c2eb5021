//! Run launcher: builds the process group, backend and counter for each
//! worker, then hands off to the coordinator.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use log::{error, info, warn};

use shardmm_compute::{ComputeBackend, CpuBackend, SerialBackend};
use shardmm_core::report::TimingReport;
use shardmm_core::timer::HardwareCounter;
use shardmm_core::verify::{verify_artifacts, VerifyReport, DEFAULT_TOLERANCE};
use shardmm_core::{Artifacts, Coordinator, LocalGroup, ProcessGroup, RunSummary, Workload};

/// Everything a worker needs, resolved from flags and configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workload: Workload,
    pub backend: String,
    pub workers: usize,
    pub output_dir: PathBuf,
    pub print_limit: usize,
    pub frequency_hz: f64,
    pub verify: bool,
    pub save_json: bool,
}

/// Run `settings.workers` in-process workers and finish on the leader.
///
/// Returns `false` if verification was requested and failed.
pub fn run_local(settings: &Settings) -> Result<bool> {
    prepare_output_dir(&settings.output_dir)?;
    let groups = LocalGroup::create(settings.workers)?;
    info!(
        "Launching {} in-process worker(s) for {}x{}x{}",
        settings.workers,
        settings.workload.m(),
        settings.workload.n(),
        settings.workload.k()
    );

    let summaries = thread::scope(|scope| -> Result<Vec<RunSummary>> {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let rank = group.membership().rank();
                thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        run_worker(&group, settings).unwrap_or_else(|e| abort_run(rank, e))
                    })
                    .with_context(|| format!("Failed to spawn worker {}", rank))
            })
            .collect::<Result<_>>()?;

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("Worker thread panicked"))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let leader = summaries
        .iter()
        .find(|s| s.membership.is_leader())
        .context("No leader summary")?;
    finish_leader(leader, settings)
}

/// Run this process as one MPI rank.
#[cfg(feature = "mpi")]
pub fn run_mpi(settings: &Settings) -> Result<bool> {
    use shardmm_core::group::MpiGroup;

    let group = MpiGroup::init()?;
    prepare_output_dir(&settings.output_dir)?;
    let summary = run_worker(&group, settings)?;

    // Every rank's result shard must be on disk before the leader reads it.
    if settings.verify {
        group.barrier();
    }

    if summary.membership.is_leader() {
        finish_leader(&summary, settings)
    } else {
        Ok(true)
    }
}

/// One worker's complete run.
fn run_worker(group: &dyn ProcessGroup, settings: &Settings) -> Result<RunSummary> {
    let rank = group.membership().rank();
    let backend = create_backend(&settings.backend)
        .with_context(|| format!("rank {}: compute backend unavailable", rank))?;
    let counter = HardwareCounter::new(settings.frequency_hz)
        .with_context(|| format!("rank {}: cycle counter unavailable", rank))?;

    // Not locked for the whole run: peers on other threads share stdout.
    let mut out = std::io::stdout();
    let summary = Coordinator::new(
        group,
        backend.as_ref(),
        &counter,
        settings.workload,
        &settings.output_dir,
    )
    .with_print_limit(settings.print_limit)
    .run(&mut out)
    .with_context(|| format!("rank {} failed", rank))?;
    Ok(summary)
}

/// A worker hit a fatal error. Peers may be blocked in a barrier that can
/// never complete, so the whole run is terminated.
fn abort_run(rank: usize, err: anyhow::Error) -> ! {
    error!("rank {} aborting run: {:#}", rank, err);
    eprintln!("Error: {:#}", err);
    std::process::exit(1);
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create output directory {}", dir.display()))
}

/// Leader-only work after every worker is done.
fn finish_leader(summary: &RunSummary, settings: &Settings) -> Result<bool> {
    if settings.save_json {
        let path = settings.output_dir.join("timing.json");
        write_timing_json(summary, &path)?;
    }

    if !settings.verify {
        return Ok(true);
    }
    let artifacts = Artifacts::new(&settings.output_dir, &settings.workload);
    let report = verify_artifacts(
        &artifacts,
        &settings.workload,
        summary.membership.size(),
        DEFAULT_TOLERANCE,
    )?;
    print_verification(&report)?;
    Ok(report.passed())
}

fn print_verification(report: &VerifyReport) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for check in report.failures() {
        writeln!(
            out,
            "  rank {}: matrix one {}, matrix two {}, result max rel. error {:.2e}",
            check.rank,
            if check.lhs_matches { "ok" } else { "MISMATCH" },
            if check.rhs_matches { "ok" } else { "MISMATCH" },
            check.max_relative_error
        )?;
    }
    if report.passed() {
        writeln!(out, "Verification passed for {} rank(s)", report.ranks.len())?;
    } else {
        writeln!(
            out,
            "Verification FAILED for {} of {} rank(s)",
            report.failures().count(),
            report.ranks.len()
        )?;
    }
    Ok(())
}

/// Write the leader's timing summary as JSON.
pub fn write_timing_json(summary: &RunSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let report = TimingReport::from(summary);
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    info!("Timing summary written to: {}", path.display());
    Ok(())
}

/// Create a compute backend based on the user's preference string.
///
/// - `"gpu"` — attempt GPU, fail if unavailable.
/// - `"cpu"` — Rayon row-parallel backend.
/// - `"serial"` — reference triple loop.
/// - `"auto"` (default) — try GPU, fall back to CPU.
pub fn create_backend(preference: &str) -> Result<Box<dyn ComputeBackend>> {
    let backend: Box<dyn ComputeBackend> = match preference {
        "serial" => Box::new(SerialBackend::new()),
        "cpu" => Box::new(CpuBackend::new()),
        "gpu" => {
            #[cfg(feature = "gpu")]
            {
                let gpu = shardmm_compute::GpuBackend::new_blocking()
                    .context("GPU requested but unavailable")?;
                Box::new(gpu)
            }
            #[cfg(not(feature = "gpu"))]
            {
                anyhow::bail!("GPU requested but binary was built without --features gpu");
            }
        }
        "auto" => auto_backend(),
        other => anyhow::bail!(
            "Unknown backend '{}'. Valid backends: auto, cpu, serial, gpu",
            other
        ),
    };
    info!("Backend: {}", backend.device_info().name);
    Ok(backend)
}

#[cfg(feature = "gpu")]
fn auto_backend() -> Box<dyn ComputeBackend> {
    match shardmm_compute::GpuBackend::new_blocking() {
        Ok(gpu) => Box::new(gpu),
        Err(e) => {
            warn!("GPU not available ({}), using CPU", e);
            Box::new(CpuBackend::new())
        }
    }
}

#[cfg(not(feature = "gpu"))]
fn auto_backend() -> Box<dyn ComputeBackend> {
    warn!("Built without GPU support, using CPU");
    Box::new(CpuBackend::new())
}
