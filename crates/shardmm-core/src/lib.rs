//! # shardmm core
//!
//! The distributed execution coordinator for `C[m×k] = A[m×n] × B[n×k]`.
//! Every worker solves a full, independently seeded instance of the problem
//! and persists its inputs and result into its own shard of three shared
//! files. Timing is taken between two process-group barriers.
//!
//! ## Modules
//!
//! - [`workload`] — The `(m, n, k)` descriptor and its validation.
//! - [`group`] — Process group membership and barrier implementations.
//! - [`init`] — Deterministic matrix initialisation keyed by `(seed, offset)`.
//! - [`timer`] — Cycle counters and timing samples.
//! - [`store`] — Offset-addressed shard files shared by all workers.
//! - [`coordinator`] — The per-worker run sequence.
//! - [`report`] — Leader console output and the JSON timing summary.
//! - [`verify`] — Read-back verification of all shards after a run.

pub mod coordinator;
pub mod group;
pub mod init;
pub mod report;
pub mod store;
pub mod timer;
pub mod verify;
pub mod workload;

pub use coordinator::{Coordinator, Phase, RunError, RunSummary};
pub use group::{LocalGroup, Membership, ProcessGroup};
pub use store::{Artifacts, ShardStore, StoreError};
pub use timer::{CycleCounter, TimingSample};
pub use workload::{Workload, WorkloadError};
