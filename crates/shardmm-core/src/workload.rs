//! Workload descriptor.

use serde::Serialize;
use shardmm_compute::MatmulShape;
use thiserror::Error;

/// Errors from constructing a [`Workload`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("Dimension '{name}' must be a positive integer")]
    ZeroDimension { name: &'static str },

    #[error("Matrix {matrix} with {rows}x{cols} elements does not fit in memory")]
    TooLarge {
        matrix: &'static str,
        rows: usize,
        cols: usize,
    },
}

/// The immutable `(m, n, k)` triple describing one multiply.
///
/// `A` is `m×n`, `B` is `n×k` and the result is `m×k`. All three are strictly
/// positive and every element count fits in a byte-addressable buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Workload {
    m: usize,
    n: usize,
    k: usize,
}

impl Workload {
    pub fn new(m: usize, n: usize, k: usize) -> Result<Self, WorkloadError> {
        for (name, value) in [("m", m), ("n", n), ("k", k)] {
            if value == 0 {
                return Err(WorkloadError::ZeroDimension { name });
            }
        }
        for (matrix, rows, cols) in [("one", m, n), ("two", n, k), ("result", m, k)] {
            let fits = rows
                .checked_mul(cols)
                .and_then(|len| len.checked_mul(std::mem::size_of::<f32>()))
                .is_some_and(|bytes| bytes <= isize::MAX as usize);
            if !fits {
                return Err(WorkloadError::TooLarge { matrix, rows, cols });
            }
        }
        Ok(Self { m, n, k })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn shape(&self) -> MatmulShape {
        MatmulShape::new(self.m, self.n, self.k)
    }

    /// Elements in matrix one (`m·n`).
    pub fn lhs_len(&self) -> usize {
        self.m * self.n
    }

    /// Elements in matrix two (`n·k`).
    pub fn rhs_len(&self) -> usize {
        self.n * self.k
    }

    /// Elements in the result (`m·k`).
    pub fn result_len(&self) -> usize {
        self.m * self.k
    }

    /// Floating-point operations in one multiply (`2·m·n·k`).
    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }

    /// Whether matrices are small enough to print in full.
    pub fn is_printable(&self, limit: usize) -> bool {
        self.result_len() < limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        let w = Workload::new(2, 3, 4).unwrap();
        assert_eq!(w.lhs_len(), 6);
        assert_eq!(w.rhs_len(), 12);
        assert_eq!(w.result_len(), 8);
        assert_eq!(w.shape(), MatmulShape::new(2, 3, 4));
        assert_eq!(w.flops(), 48.0);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert_eq!(
            Workload::new(4, 0, 4),
            Err(WorkloadError::ZeroDimension { name: "n" })
        );
    }

    #[test]
    fn test_overflow_rejected() {
        let err = Workload::new(usize::MAX / 2, 3, 1).unwrap_err();
        assert!(matches!(err, WorkloadError::TooLarge { matrix: "one", .. }));
    }

    #[test]
    fn test_print_limit_is_strict() {
        assert!(Workload::new(15, 1, 17).unwrap().is_printable(256));
        assert!(!Workload::new(16, 1, 16).unwrap().is_printable(256));
    }
}
