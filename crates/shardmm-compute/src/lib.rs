//! # shardmm compute
//!
//! Compute backends for the shardmm workload `C[m×k] = A[m×n] × B[n×k]`.
//! The coordinator in `shardmm-core` only ever sees the
//! [`ComputeBackend`](backend::ComputeBackend) trait, so serial, threaded and
//! accelerator implementations are interchangeable.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Accumulation order |
//! |---------|-------------|--------------------|
//! | Serial triple loop | always | row, column, shared dimension |
//! | CPU (Rayon) | `cpu` (default) | same as serial, rows in parallel |
//! | GPU (wgpu) | `gpu` | one invocation per output element |

pub mod backend;
pub mod serial;

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, MatmulShape};
pub use serial::SerialBackend;

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;
