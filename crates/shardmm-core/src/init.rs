//! Deterministic matrix initialisation.
//!
//! A matrix is filled from a PCG stream seeded with `seed + offset`. The two
//! input matrices of a worker share the base seed (its rank) and differ only
//! in `offset`, so every worker and every operand gets its own sequence.
//!
//! Values are integers drawn uniformly from `[0, 2^31 - 1]` scaled by
//! `1 / 10000`, giving non-negative floats up to about `214748.36`.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Offset used for matrix one.
pub const LHS_OFFSET: u64 = 0;
/// Offset used for matrix two.
pub const RHS_OFFSET: u64 = 1;

const RAW_MAX: u32 = i32::MAX as u32;
const SCALE: f32 = 10_000.0;

/// Fill `matrix` with the sequence keyed by `seed + offset`.
///
/// Identical `(seed, offset, matrix.len())` always produce identical bytes.
pub fn fill_matrix(matrix: &mut [f32], seed: u64, offset: u64) {
    let mut rng = Pcg64::seed_from_u64(seed.wrapping_add(offset));
    for value in matrix.iter_mut() {
        *value = rng.gen_range(0..=RAW_MAX) as f32 / SCALE;
    }
}

/// Allocate and fill a matrix of `len` elements.
pub fn generate_matrix(len: usize, seed: u64, offset: u64) -> Vec<f32> {
    let mut matrix = vec![0.0f32; len];
    fill_matrix(&mut matrix, seed, offset);
    matrix
}
