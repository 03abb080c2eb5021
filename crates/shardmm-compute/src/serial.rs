//! Reference serial backend.
//!
//! The loop nest is fixed: result rows, then result columns, then the shared
//! dimension. Test oracles rely on this order for the expected rounding.

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, MatmulShape};

/// Single-threaded triple-loop multiply.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Row-major triple loop shared by the serial and Rayon backends.
///
/// Writes one output row `row` of length `k` into `out_row`.
pub(crate) fn multiply_row(
    a: &[f32],
    b: &[f32],
    shape: MatmulShape,
    row: usize,
    out_row: &mut [f32],
) {
    let MatmulShape { n, k, .. } = shape;
    let a_row = &a[row * n..(row + 1) * n];
    for (j, out) in out_row.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for (l, &a_val) in a_row.iter().enumerate() {
            sum += a_val * b[l * k + j];
        }
        *out = sum;
    }
}

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial (1 thread)".into(),
            backend_type: BackendType::Serial,
            memory_bytes: None,
            compute_units: Some(1),
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
        for (i, out_row) in out.chunks_mut(shape.k).enumerate() {
            multiply_row(a, b, shape, i, out_row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_two_by_two() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let c = SerialBackend::new()
            .multiply(&a, &b, MatmulShape::new(2, 2, 2))
            .unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_scalar_product() {
        let c = SerialBackend::new()
            .multiply(&[3.5], &[-2.0], MatmulShape::new(1, 1, 1))
            .unwrap();
        assert_eq!(c, vec![-7.0]);
    }

    #[test]
    fn test_rectangular_matches_f64_reference() {
        let (m, n, k) = (5, 7, 3);
        let a: Vec<f32> = (0..m * n).map(|i| ((i * 37 + 11) % 101) as f32 / 13.0).collect();
        let b: Vec<f32> = (0..n * k).map(|i| ((i * 53 + 7) % 89) as f32 / 17.0).collect();

        let c = SerialBackend::new()
            .multiply(&a, &b, MatmulShape::new(m, n, k))
            .unwrap();

        let a64 = Array2::from_shape_fn((m, n), |(i, l)| a[i * n + l] as f64);
        let b64 = Array2::from_shape_fn((n, k), |(l, j)| b[l * k + j] as f64);
        let expected = a64.dot(&b64);

        for i in 0..m {
            for j in 0..k {
                assert_relative_eq!(c[i * k + j] as f64, expected[[i, j]], max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let err = SerialBackend::new()
            .multiply(&[1.0; 3], &[1.0; 4], MatmulShape::new(2, 2, 2))
            .unwrap_err();
        assert!(matches!(err, ComputeError::ShapeMismatch { operand: "lhs", .. }));
    }
}
