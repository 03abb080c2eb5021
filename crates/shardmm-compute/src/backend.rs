//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait is the single function-shaped boundary the
//! coordinator calls into. Implementations own whatever device state they
//! need; one instance is created per worker and never shared between workers.

use std::fmt;

use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Out of memory: requested {requested} bytes, available {available}")]
    OutOfMemory { requested: usize, available: usize },

    #[error("Shape mismatch: {operand} has {got} elements, expected {expected}")]
    ShapeMismatch {
        operand: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub memory_bytes: Option<usize>,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Cpu,
    Gpu,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Serial => "serial",
            BackendType::Cpu => "cpu",
            BackendType::Gpu => "gpu",
        };
        f.write_str(name)
    }
}

/// Dimensions of one multiply: `A` is `m×n`, `B` is `n×k`, `C` is `m×k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Element count of the left operand.
    pub fn lhs_len(&self) -> usize {
        self.m * self.n
    }

    /// Element count of the right operand.
    pub fn rhs_len(&self) -> usize {
        self.n * self.k
    }

    /// Element count of the product.
    pub fn out_len(&self) -> usize {
        self.m * self.k
    }

    /// Check operand lengths against this shape.
    pub fn check_operands(&self, a: &[f32], b: &[f32]) -> Result<(), ComputeError> {
        if a.len() != self.lhs_len() {
            return Err(ComputeError::ShapeMismatch {
                operand: "lhs",
                expected: self.lhs_len(),
                got: a.len(),
            });
        }
        if b.len() != self.rhs_len() {
            return Err(ComputeError::ShapeMismatch {
                operand: "rhs",
                expected: self.rhs_len(),
                got: b.len(),
            });
        }
        Ok(())
    }
}

/// Abstraction over compute backends.
///
/// Operands are flat row-major `f32` buffers. Implementations may reorder or
/// tile the accumulation, so results from different backends agree only
/// within floating-point tolerance.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Compute `C = A × B` and return `C` as a new `m·k` buffer.
    fn multiply(&self, a: &[f32], b: &[f32], shape: MatmulShape)
        -> Result<Vec<f32>, ComputeError>;
}
