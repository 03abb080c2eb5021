//! Cycle counters and timing samples.
//!
//! A [`CycleCounter`] is an opaque, monotonically non-decreasing counter.
//! Two readings form a [`TimingSample`], which converts to seconds through
//! the counter's fixed frequency.

use serde::Serialize;
use thiserror::Error;

/// Nominal counter frequency of the POWER9 timebase (512 MHz).
pub const DEFAULT_FREQUENCY_HZ: f64 = 512_000_000.0;

/// Errors from locating a hardware counter.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("No hardware cycle counter on this platform ({0})")]
    Unavailable(&'static str),

    #[error("Counter frequency must be positive and finite, got {0}")]
    InvalidFrequency(f64),
}

/// A monotonic counter with a fixed tick rate.
pub trait CycleCounter: Send + Sync {
    /// Current counter value.
    fn now(&self) -> u64;

    /// Ticks per second.
    fn frequency_hz(&self) -> f64;

    /// Start a sample at the current reading.
    fn start(&self) -> PendingSample {
        PendingSample { start: self.now() }
    }
}

/// A sample whose start has been read but whose end has not.
#[derive(Debug, Clone, Copy)]
pub struct PendingSample {
    start: u64,
}

impl PendingSample {
    pub fn stop(self, counter: &dyn CycleCounter) -> TimingSample {
        TimingSample {
            start: self.start,
            end: counter.now(),
        }
    }
}

/// A pair of counter readings bracketing one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingSample {
    pub start: u64,
    pub end: u64,
}

impl TimingSample {
    pub fn ticks(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Elapsed seconds at `frequency_hz` ticks per second.
    pub fn seconds(&self, frequency_hz: f64) -> f64 {
        self.ticks() as f64 / frequency_hz
    }
}

/// Nanosecond counter backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicCounter {
    origin: std::time::Instant,
}

impl MonotonicCounter {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for MonotonicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCounter for MonotonicCounter {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn frequency_hz(&self) -> f64 {
        1e9
    }
}

/// The CPU's free-running cycle counter.
///
/// Reads `RDTSC` on x86_64 and `CNTVCT_EL0` on aarch64. The frequency is
/// supplied by the caller because x86 exposes no architectural way to
/// discover it.
#[derive(Debug, Clone, Copy)]
pub struct HardwareCounter {
    frequency_hz: f64,
}

impl HardwareCounter {
    /// Use the platform counter at the given nominal frequency.
    pub fn new(frequency_hz: f64) -> Result<Self, TimerError> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(TimerError::InvalidFrequency(frequency_hz));
        }
        if !cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            return Err(TimerError::Unavailable(std::env::consts::ARCH));
        }
        Ok(Self { frequency_hz })
    }
}

impl CycleCounter for HardwareCounter {
    fn now(&self) -> u64 {
        read_hardware_counter()
    }

    fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }
}

#[cfg(target_arch = "x86_64")]
fn read_hardware_counter() -> u64 {
    // SAFETY: RDTSC has no preconditions on x86_64.
    #[allow(unused_unsafe)]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }
}

#[cfg(target_arch = "aarch64")]
fn read_hardware_counter() -> u64 {
    let ticks: u64;
    // SAFETY: CNTVCT_EL0 is readable from EL0 on all aarch64 targets Rust supports.
    unsafe { std::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks) };
    ticks
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn read_hardware_counter() -> u64 {
    // Unreachable: HardwareCounter::new refuses these targets.
    0
}
