//! CPU compute backend using Rayon for shared-memory parallelism.

use rayon::prelude::*;

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, MatmulShape};
use crate::serial::multiply_row;

/// CPU backend that parallelises output rows across threads via Rayon.
///
/// Each output element is accumulated in the same order as
/// [`SerialBackend`](crate::SerialBackend), so the two agree bit-for-bit.
pub struct CpuBackend {
    num_threads: usize,
    /// Dedicated pool; `None` runs on Rayon's global pool.
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend running on its own pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("shardmm-cpu-{}", i))
            .build()
            .map_err(|e| ComputeError::Unavailable(format!("Rayon thread pool: {}", e)))?;
        log::debug!("CPU backend pool with {} thread(s)", pool.current_num_threads());
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(pool),
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            memory_bytes: None,
            compute_units: Some(self.num_threads),
        }
    }

    fn multiply(
        &self,
        a: &[f32],
        b: &[f32],
        shape: MatmulShape,
    ) -> Result<Vec<f32>, ComputeError> {
        shape.check_operands(a, b)?;

        let mut out = vec![0.0f32; shape.out_len()];
        let fill = |out: &mut [f32]| {
            out.par_chunks_mut(shape.k)
                .enumerate()
                .for_each(|(i, out_row)| multiply_row(a, b, shape, i, out_row));
        };
        match &self.pool {
            Some(pool) => pool.install(|| fill(&mut out)),
            None => fill(&mut out),
        }
        Ok(out)
    }
}
