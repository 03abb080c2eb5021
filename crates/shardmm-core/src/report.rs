//! Leader console report and the serialisable timing summary.

use std::io::{self, Write};

use serde::Serialize;

use crate::coordinator::RunSummary;
use crate::workload::Workload;

/// The three matrices of a small run, borrowed for printing.
#[derive(Debug, Clone, Copy)]
pub struct MatrixDump<'a> {
    pub workload: Workload,
    pub lhs: &'a [f32],
    pub rhs: &'a [f32],
    pub result: &'a [f32],
}

/// Write a row-major matrix with two decimals per element, one row per line,
/// followed by a blank line.
pub fn write_matrix(
    out: &mut dyn Write,
    matrix: &[f32],
    rows: usize,
    cols: usize,
) -> io::Result<()> {
    for row in matrix.chunks(cols).take(rows) {
        for value in row {
            write!(out, "{:.2} ", value)?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}

/// Write the leader's report: optional matrix dumps, then timings.
pub fn write_report(
    out: &mut dyn Write,
    summary: &RunSummary,
    dump: Option<MatrixDump<'_>>,
) -> io::Result<()> {
    if let Some(dump) = dump {
        let w = dump.workload;
        writeln!(out, "Matrix one:")?;
        write_matrix(out, dump.lhs, w.m(), w.n())?;
        writeln!(out, "Matrix two:")?;
        write_matrix(out, dump.rhs, w.n(), w.k())?;
        writeln!(out, "Result matrix:")?;
        write_matrix(out, dump.result, w.m(), w.k())?;
    }

    writeln!(
        out,
        "Time spent reading and writing input matrices: {:.6} seconds",
        summary.io_seconds()
    )?;
    writeln!(out, "Execution time: {:.6} seconds", summary.compute_wall_seconds)?;
    writeln!(
        out,
        "Execution time from cycle counter: {:.6} seconds",
        summary.compute_cycle_seconds()
    )?;
    out.flush()
}

/// Flat timing record for `timing.json`.
#[derive(Debug, Clone, Serialize)]
pub struct TimingReport {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub workers: usize,
    pub backend: String,
    pub counter_frequency_hz: f64,
    pub io_seconds: f64,
    pub compute_seconds: f64,
    pub compute_cycle_seconds: f64,
    pub gflops: f64,
}

impl From<&RunSummary> for TimingReport {
    fn from(summary: &RunSummary) -> Self {
        Self {
            m: summary.workload.m(),
            n: summary.workload.n(),
            k: summary.workload.k(),
            workers: summary.membership.size(),
            backend: summary.backend.clone(),
            counter_frequency_hz: summary.frequency_hz,
            io_seconds: summary.io_seconds(),
            compute_seconds: summary.compute_wall_seconds,
            compute_cycle_seconds: summary.compute_cycle_seconds(),
            gflops: summary.gflops(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Membership;
    use crate::timer::TimingSample;

    fn summary() -> RunSummary {
        RunSummary {
            membership: Membership::new(0, 2).unwrap(),
            workload: Workload::new(2, 2, 2).unwrap(),
            backend: "Serial (1 thread)".into(),
            frequency_hz: 1000.0,
            io: TimingSample { start: 0, end: 250 },
            compute: TimingSample { start: 1000, end: 1500 },
            compute_wall_seconds: 0.5,
        }
    }

    #[test]
    fn test_matrix_format() {
        let mut out = Vec::new();
        write_matrix(&mut out, &[1.0, 2.5, -3.0, 4.0], 2, 2).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1.00 2.50 \n-3.00 4.00 \n\n");
    }

    #[test]
    fn test_report_without_dump() {
        let mut out = Vec::new();
        write_report(&mut out, &summary(), None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Time spent reading and writing input matrices: 0.250000 seconds\n\
             Execution time: 0.500000 seconds\n\
             Execution time from cycle counter: 0.500000 seconds\n"
        );
    }

    #[test]
    fn test_report_with_dump_orders_sections() {
        let mut out = Vec::new();
        let dump = MatrixDump {
            workload: Workload::new(1, 2, 1).unwrap(),
            lhs: &[1.0, 2.0],
            rhs: &[3.0, 4.0],
            result: &[11.0],
        };
        write_report(&mut out, &summary(), Some(dump)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(
            "Matrix one:\n1.00 2.00 \n\nMatrix two:\n3.00 \n4.00 \n\nResult matrix:\n11.00 \n\n"
        ));
    }

    #[test]
    fn test_timing_report() {
        let report = TimingReport::from(&summary());
        assert_eq!(report.workers, 2);
        assert_eq!(report.io_seconds, 0.25);
        assert_eq!(report.compute_cycle_seconds, 0.5);
        // 16 flops per worker, two workers, half a second.
        assert!((report.gflops - 64e-9).abs() < 1e-15);
    }
}
