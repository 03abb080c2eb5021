//! End-to-end runs of the coordinator with in-process worker groups.

use std::path::Path;
use std::thread;

use approx::assert_relative_eq;
use ndarray::Array2;

use shardmm_compute::{ComputeBackend, CpuBackend, SerialBackend};
use shardmm_core::init::{generate_matrix, LHS_OFFSET, RHS_OFFSET};
use shardmm_core::store::{RESULT_FILE, LHS_FILE};
use shardmm_core::timer::MonotonicCounter;
use shardmm_core::verify::{verify_artifacts, DEFAULT_TOLERANCE};
use shardmm_core::{Artifacts, Coordinator, LocalGroup, RunSummary, Workload};

/// Run `size` workers as threads; returns each summary and the leader's output.
fn run_group(size: usize, workload: Workload, dir: &Path) -> (Vec<RunSummary>, String) {
    let groups = LocalGroup::create(size).unwrap();
    let mut results: Vec<(RunSummary, Vec<u8>)> = thread::scope(|scope| {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                scope.spawn(move || {
                    let backend = CpuBackend::with_threads(1).unwrap();
                    let counter = MonotonicCounter::new();
                    let mut out = Vec::new();
                    let summary = Coordinator::new(&group, &backend, &counter, workload, dir)
                        .run(&mut out)
                        .unwrap();
                    (summary, out)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    results.sort_by_key(|(summary, _)| summary.membership.rank());
    for (summary, out) in &results[1..] {
        assert!(out.is_empty(), "rank {} printed output", summary.membership.rank());
    }
    let leader_out = String::from_utf8(results[0].1.clone()).unwrap();
    (results.into_iter().map(|(s, _)| s).collect(), leader_out)
}

/// Double-precision reference product.
fn reference_product(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Array2<f64> {
    let a64 = Array2::from_shape_fn((m, n), |(i, l)| a[i * n + l] as f64);
    let b64 = Array2::from_shape_fn((n, k), |(l, j)| b[l * k + j] as f64);
    a64.dot(&b64)
}

#[test]
fn test_two_by_two_single_worker_seed_zero() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(2, 2, 2).unwrap();
    let (_, out) = run_group(1, workload, dir.path());

    let bytes = std::fs::read(dir.path().join(RESULT_FILE)).unwrap();
    assert_eq!(bytes.len(), 4 * std::mem::size_of::<f32>());
    let result: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let a = generate_matrix(4, 0, LHS_OFFSET);
    let b = generate_matrix(4, 0, RHS_OFFSET);
    let expected = reference_product(&a, &b, 2, 2, 2);
    for i in 0..2 {
        for j in 0..2 {
            assert_relative_eq!(result[i * 2 + j] as f64, expected[[i, j]], max_relative = 1e-4);
        }
    }

    // Small runs dump all three matrices before the timings.
    assert!(out.starts_with("Matrix one:\n"));
    assert!(out.contains("Result matrix:\n"));
    assert!(out.contains("Execution time from cycle counter:"));
}

#[test]
fn test_scalar_workload() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(1, 1, 1).unwrap();
    run_group(1, workload, dir.path());

    let artifacts = Artifacts::new(dir.path(), &workload);
    let a = artifacts.lhs.read_shard(0).unwrap();
    let b = artifacts.rhs.read_shard(0).unwrap();
    let c = artifacts.result.read_shard(0).unwrap();
    assert_eq!(c, vec![a[0] * b[0]]);
}

#[test]
fn test_serial_backend_matches_f64_reference() {
    let backend = SerialBackend::new();
    for &(m, n, k) in &[(1, 1, 1), (1, 9, 4), (7, 3, 5), (16, 16, 16), (31, 2, 29)] {
        let workload = Workload::new(m, n, k).unwrap();
        let a = generate_matrix(workload.lhs_len(), 11, LHS_OFFSET);
        let b = generate_matrix(workload.rhs_len(), 11, RHS_OFFSET);
        let c = backend.multiply(&a, &b, workload.shape()).unwrap();
        let expected = reference_product(&a, &b, m, n, k);
        for i in 0..m {
            for j in 0..k {
                assert_relative_eq!(c[i * k + j] as f64, expected[[i, j]], max_relative = 1e-4);
            }
        }
    }
}

#[test]
fn test_four_workers_fill_disjoint_shards() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(6, 5, 4).unwrap();
    let (summaries, _) = run_group(4, workload, dir.path());

    assert_eq!(summaries.len(), 4);
    for (rank, summary) in summaries.iter().enumerate() {
        assert_eq!(summary.membership.rank(), rank);
        assert_eq!(summary.membership.size(), 4);
    }

    let artifacts = Artifacts::new(dir.path(), &workload);
    let report = verify_artifacts(&artifacts, &workload, 4, DEFAULT_TOLERANCE).unwrap();
    assert_eq!(report.ranks.len(), 4);
    assert!(report.passed(), "{:?}", report);

    // Each rank persisted its own instance.
    let first = artifacts.lhs.read_shard(0).unwrap();
    let second = artifacts.lhs.read_shard(1).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_large_run_skips_matrix_dump() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(16, 8, 16).unwrap();
    let (_, out) = run_group(2, workload, dir.path());
    assert!(!out.contains("Matrix one:"));
    assert!(out.starts_with("Time spent reading and writing input matrices:"));
}

#[test]
fn test_verification_detects_corrupted_shard() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(3, 3, 3).unwrap();
    run_group(2, workload, dir.path());

    let artifacts = Artifacts::new(dir.path(), &workload);
    artifacts.lhs.write_shard(1, &[0.0; 9]).unwrap();

    let report = verify_artifacts(&artifacts, &workload, 2, DEFAULT_TOLERANCE).unwrap();
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].rank, 1);
    assert!(!failed[0].lhs_matches);
    assert!(failed[0].rhs_matches);
}

#[test]
fn test_verification_rejects_wrong_group_size() {
    let dir = tempfile::tempdir().unwrap();
    let workload = Workload::new(2, 3, 2).unwrap();
    run_group(2, workload, dir.path());

    let artifacts = Artifacts::new(dir.path(), &workload);
    assert!(verify_artifacts(&artifacts, &workload, 3, DEFAULT_TOLERANCE).is_err());
    assert!(dir.path().join(LHS_FILE).exists());
}

#[test]
fn test_smaller_rerun_in_same_directory_keeps_layout() {
    let dir = tempfile::tempdir().unwrap();
    run_group(2, Workload::new(4, 4, 4).unwrap(), dir.path());

    let workload = Workload::new(2, 2, 2).unwrap();
    run_group(2, workload, dir.path());

    let artifacts = Artifacts::new(dir.path(), &workload);
    for store in artifacts.iter() {
        store.check_layout(2).unwrap();
    }
    let result_bytes = std::fs::metadata(dir.path().join(RESULT_FILE)).unwrap().len();
    assert_eq!(result_bytes, 2 * 4 * 4);

    let report = verify_artifacts(&artifacts, &workload, 2, DEFAULT_TOLERANCE).unwrap();
    assert!(report.passed(), "{:?}", report);
}
