//! Per-worker run sequence.
//!
//! One [`Coordinator`] runs on each worker and walks the same phases in
//! lockstep with its peers:
//!
//! ```text
//! ALLOCATE → POPULATE → PERSIST_INPUTS → BARRIER_1 → COMPUTE → BARRIER_2
//!          → PERSIST_OUTPUT → REPORT (leader) → RELEASE → DONE
//! ```
//!
//! Every worker multiplies a full, independently seeded instance of the
//! problem; nothing is partitioned except the shard each worker owns in the
//! three artifact files. Compute time is measured strictly between the two
//! barriers, so it reflects the slowest worker.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, info};
use serde::Serialize;
use shardmm_compute::{ComputeBackend, ComputeError};
use thiserror::Error;

use crate::group::{GroupError, Membership, ProcessGroup};
use crate::init::{fill_matrix, LHS_OFFSET, RHS_OFFSET};
use crate::report::{write_report, MatrixDump};
use crate::store::{Artifacts, StoreError};
use crate::timer::{CycleCounter, TimingSample};
use crate::workload::{Workload, WorkloadError};

/// Result matrices with fewer elements than this are printed in full.
pub const DEFAULT_PRINT_LIMIT: usize = 256;

/// Fatal errors from a worker's run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid workload: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Process group error: {0}")]
    Group(#[from] GroupError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Failed to write report: {0}")]
    Report(#[from] io::Error),

    #[error("Backend returned {got} result elements, expected {expected}")]
    ResultLength { expected: usize, got: usize },
}

/// Phases of a worker's run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Allocate,
    Populate,
    PersistInputs,
    Barrier1,
    Compute,
    Barrier2,
    PersistOutput,
    Report,
    Release,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Allocate => "ALLOCATE",
            Phase::Populate => "POPULATE",
            Phase::PersistInputs => "PERSIST_INPUTS",
            Phase::Barrier1 => "SYNC_BARRIER_1",
            Phase::Compute => "COMPUTE",
            Phase::Barrier2 => "SYNC_BARRIER_2",
            Phase::PersistOutput => "PERSIST_OUTPUT",
            Phase::Report => "REPORT",
            Phase::Release => "RELEASE",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Timing and identity of one completed worker run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub membership: Membership,
    pub workload: Workload,
    pub backend: String,
    pub frequency_hz: f64,
    /// Counter readings around persisting both inputs.
    pub io: TimingSample,
    /// Counter readings between the two barriers.
    pub compute: TimingSample,
    /// Wall-clock seconds between the two barriers.
    pub compute_wall_seconds: f64,
}

impl RunSummary {
    pub fn io_seconds(&self) -> f64 {
        self.io.seconds(self.frequency_hz)
    }

    pub fn compute_cycle_seconds(&self) -> f64 {
        self.compute.seconds(self.frequency_hz)
    }

    /// Aggregate throughput of all workers over the wall-clock compute phase.
    pub fn gflops(&self) -> f64 {
        if self.compute_wall_seconds <= 0.0 {
            return 0.0;
        }
        self.workload.flops() * self.membership.size() as f64 / self.compute_wall_seconds / 1e9
    }
}

/// Drives one worker through a complete run.
pub struct Coordinator<'a> {
    group: &'a dyn ProcessGroup,
    backend: &'a dyn ComputeBackend,
    counter: &'a dyn CycleCounter,
    workload: Workload,
    artifacts: Artifacts,
    print_limit: usize,
}

impl<'a> Coordinator<'a> {
    /// Artifacts are written under `output_dir`.
    pub fn new(
        group: &'a dyn ProcessGroup,
        backend: &'a dyn ComputeBackend,
        counter: &'a dyn CycleCounter,
        workload: Workload,
        output_dir: &Path,
    ) -> Self {
        Self {
            group,
            backend,
            counter,
            workload,
            artifacts: Artifacts::new(output_dir, &workload),
            print_limit: DEFAULT_PRINT_LIMIT,
        }
    }

    /// Print matrices only when the result has fewer than `limit` elements.
    pub fn with_print_limit(mut self, limit: usize) -> Self {
        self.print_limit = limit;
        self
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    fn enter(&self, rank: usize, phase: Phase) {
        debug!("[rank {}] {}", rank, phase);
    }

    /// Run every phase. The leader writes its report to `out`.
    ///
    /// Any error is fatal to this worker. Peers still waiting at a barrier
    /// are not released.
    pub fn run(&self, out: &mut dyn Write) -> Result<RunSummary, RunError> {
        let membership = self.group.membership();
        let rank = membership.rank();
        let seed = rank as u64;
        let workload = self.workload;

        self.enter(rank, Phase::Allocate);
        let mut lhs = vec![0.0f32; workload.lhs_len()];
        let mut rhs = vec![0.0f32; workload.rhs_len()];

        self.enter(rank, Phase::Populate);
        fill_matrix(&mut lhs, seed, LHS_OFFSET);
        fill_matrix(&mut rhs, seed, RHS_OFFSET);

        self.enter(rank, Phase::PersistInputs);
        let io_pending = self.counter.start();
        self.artifacts.lhs.write_shard(rank, &lhs)?;
        self.artifacts.rhs.write_shard(rank, &rhs)?;
        if membership.is_leader() {
            self.artifacts.lhs.discard_stale_tail(membership.size())?;
            self.artifacts.rhs.discard_stale_tail(membership.size())?;
        }
        let io = io_pending.stop(self.counter);
        info!(
            "[rank {}] wrote input shards in {:.6} s",
            rank,
            io.seconds(self.counter.frequency_hz())
        );

        self.enter(rank, Phase::Barrier1);
        self.group.barrier();
        let wall_start = self.group.wtime();
        let compute_pending = self.counter.start();

        self.enter(rank, Phase::Compute);
        let result = self.backend.multiply(&lhs, &rhs, workload.shape())?;
        if result.len() != workload.result_len() {
            return Err(RunError::ResultLength {
                expected: workload.result_len(),
                got: result.len(),
            });
        }

        self.enter(rank, Phase::Barrier2);
        self.group.barrier();
        let wall_end = self.group.wtime();
        let compute = compute_pending.stop(self.counter);

        self.enter(rank, Phase::PersistOutput);
        self.artifacts.result.write_shard(rank, &result)?;
        if membership.is_leader() {
            self.artifacts.result.discard_stale_tail(membership.size())?;
        }

        let summary = RunSummary {
            membership,
            workload,
            backend: self.backend.device_info().name,
            frequency_hz: self.counter.frequency_hz(),
            io,
            compute,
            compute_wall_seconds: wall_end - wall_start,
        };

        if membership.is_leader() {
            self.enter(rank, Phase::Report);
            let dump = workload
                .is_printable(self.print_limit)
                .then_some(MatrixDump {
                    workload,
                    lhs: &lhs,
                    rhs: &rhs,
                    result: &result,
                });
            write_report(out, &summary, dump)?;
        }

        self.enter(rank, Phase::Release);
        drop(lhs);
        drop(rhs);
        drop(result);

        self.enter(rank, Phase::Done);
        Ok(summary)
    }
}
