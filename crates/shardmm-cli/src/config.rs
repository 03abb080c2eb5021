//! TOML configuration for a benchmark run.
//!
//! Every field has a default, so an empty file (or no file at all) is valid.
//! Command-line flags override values loaded here.

use std::path::PathBuf;

use serde::Deserialize;
use shardmm_core::coordinator::DEFAULT_PRINT_LIMIT;
use shardmm_core::timer::DEFAULT_FREQUENCY_HZ;

/// Top-level run configuration.
#[derive(Debug, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub timer: TimerConfig,
}

/// Execution parameters.
#[derive(Debug, Deserialize)]
pub struct RunSection {
    /// Compute backend: "auto", "cpu", "serial" or "gpu". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// In-process worker count. Ignored under MPI.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            workers: default_workers(),
        }
    }
}

fn default_backend() -> String {
    "auto".into()
}
fn default_workers() -> usize {
    1
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory for the three shard files (default: current directory).
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    /// Whether the leader writes `timing.json` (default: false).
    #[serde(default)]
    pub save_json: bool,
    /// Print matrices only when the result has fewer elements than this.
    #[serde(default = "default_print_limit")]
    pub print_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_json: false,
            print_limit: default_print_limit(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_print_limit() -> usize {
    DEFAULT_PRINT_LIMIT
}

/// Cycle counter configuration.
#[derive(Debug, Deserialize)]
pub struct TimerConfig {
    /// Counter ticks per second used to convert cycle readings to seconds.
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency(),
        }
    }
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

/// Load and parse a TOML run configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<RunConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: RunConfig = toml::from_str(&content)?;
    Ok(config)
}
