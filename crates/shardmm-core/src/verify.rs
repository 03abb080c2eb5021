//! Read-back verification of a completed run.
//!
//! The file layout carries no metadata, so it is rebuilt from
//! `(m, n, k, size)`. For each rank the input shards must equal the
//! initialiser's output for that rank exactly, and the result shard must
//! match a serial recomputation within a relative tolerance.

use log::{debug, warn};
use shardmm_compute::{ComputeBackend, SerialBackend};

use crate::coordinator::RunError;
use crate::init::{generate_matrix, LHS_OFFSET, RHS_OFFSET};
use crate::store::Artifacts;
use crate::workload::Workload;

/// Default relative tolerance for result comparison.
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// Outcome for one rank's shards.
#[derive(Debug, Clone, PartialEq)]
pub struct RankCheck {
    pub rank: usize,
    pub lhs_matches: bool,
    pub rhs_matches: bool,
    /// Largest `|got - want| / max(|want|, 1)` over the result shard.
    pub max_relative_error: f32,
    pub tolerance: f32,
}

impl RankCheck {
    pub fn passed(&self) -> bool {
        self.lhs_matches && self.rhs_matches && self.max_relative_error <= self.tolerance
    }
}

/// Outcome for a whole run.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub ranks: Vec<RankCheck>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.ranks.iter().all(RankCheck::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RankCheck> {
        self.ranks.iter().filter(|check| !check.passed())
    }
}

/// Largest element-wise relative error between `got` and `want`.
pub fn max_relative_error(got: &[f32], want: &[f32]) -> f32 {
    got.iter()
        .zip(want)
        .map(|(g, w)| (g - w).abs() / w.abs().max(1.0))
        .fold(0.0, f32::max)
}

/// Check every rank's shards in `artifacts` for a group of `size` workers.
///
/// Layout and I/O problems are errors; content mismatches are reported in
/// the returned [`VerifyReport`].
pub fn verify_artifacts(
    artifacts: &Artifacts,
    workload: &Workload,
    size: usize,
    tolerance: f32,
) -> Result<VerifyReport, RunError> {
    for store in artifacts.iter() {
        store.check_layout(size)?;
    }

    let reference = SerialBackend::new();
    let mut report = VerifyReport::default();
    for rank in 0..size {
        let seed = rank as u64;
        let lhs = artifacts.lhs.read_shard(rank)?;
        let rhs = artifacts.rhs.read_shard(rank)?;
        let result = artifacts.result.read_shard(rank)?;

        let lhs_matches = lhs == generate_matrix(workload.lhs_len(), seed, LHS_OFFSET);
        let rhs_matches = rhs == generate_matrix(workload.rhs_len(), seed, RHS_OFFSET);

        // Recompute from the stored inputs so a result error is reported
        // independently of an input mismatch.
        let expected = reference.multiply(&lhs, &rhs, workload.shape())?;
        let check = RankCheck {
            rank,
            lhs_matches,
            rhs_matches,
            max_relative_error: max_relative_error(&result, &expected),
            tolerance,
        };

        if check.passed() {
            debug!("rank {} shards verified", rank);
        } else {
            warn!("rank {} failed verification: {:?}", rank, check);
        }
        report.ranks.push(check);
    }
    Ok(report)
}
