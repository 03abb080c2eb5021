//! Runs the `shardmm` binary as a user would.

use std::process::Command;

fn shardmm() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shardmm"));
    for var in ["OMPI_COMM_WORLD_RANK", "PMI_RANK", "PMIX_RANK", "SLURM_PROCID"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_wrong_argument_count_exits_one_without_files() {
    let dir = tempfile::tempdir().unwrap();
    let output = shardmm()
        .current_dir(dir.path())
        .args(["4", "4"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Incorrect number of arguments. Usage:"));
    assert!(stdout.contains("k: number of columns in matrix two"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_zero_dimension_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let output = shardmm()
        .current_dir(dir.path())
        .args(["4", "0", "4"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("must be a positive integer"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_negative_dimension_is_not_an_arity_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = shardmm()
        .current_dir(dir.path())
        .args(["2", "-3", "2"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Incorrect number of arguments"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("must be a positive integer"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
fn test_small_run_writes_shards_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let output = shardmm()
        .current_dir(dir.path())
        .args(["--workers", "2", "--backend", "serial", "--verify", "2", "2", "2"])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("Result matrix:").count(), 1);
    assert!(stdout.contains("Verification passed for 2 rank(s)"));

    for name in ["matrix_One.bin", "matrix_Two.bin", "matrix_Result.bin"] {
        let len = std::fs::metadata(dir.path().join(name)).unwrap().len();
        // Two ranks, four f32 values each.
        assert_eq!(len, 2 * 4 * 4, "{}", name);
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
fn test_repeat_run_with_smaller_dimensions_still_verifies() {
    let dir = tempfile::tempdir().unwrap();
    for dims in [["4", "4", "4"], ["2", "2", "2"]] {
        let output = shardmm()
            .current_dir(dir.path())
            .args(["--workers", "2", "--backend", "serial", "--verify"])
            .args(dims)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    }

    for name in ["matrix_One.bin", "matrix_Two.bin", "matrix_Result.bin"] {
        let len = std::fs::metadata(dir.path().join(name)).unwrap().len();
        assert_eq!(len, 2 * 4 * 4, "{}", name);
    }
}
