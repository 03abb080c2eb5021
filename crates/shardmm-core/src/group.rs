//! Process group membership and barrier synchronisation.
//!
//! A worker's `(rank, size)` is an explicit [`Membership`] value created once
//! and handed to every component that needs it. The [`ProcessGroup`] trait
//! adds the one collective the coordinator uses: a full barrier.
//!
//! Two implementations are provided:
//!
//! - [`LocalGroup`]: workers are threads in one process sharing a count-down
//!   barrier. Used by the default launcher and by tests.
//! - `MpiGroup` (feature `mpi`): one worker per MPI process, synchronised
//!   through `MPI_Barrier` on the world communicator.

use std::sync::{Arc, Barrier};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

/// Errors from forming a process group.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Process group must contain at least one worker")]
    Empty,

    #[error("Rank {rank} is outside a group of size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("MPI initialisation failed: {0}")]
    Init(String),
}

/// A worker's identity within the process group, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Membership {
    rank: usize,
    size: usize,
}

impl Membership {
    pub fn new(rank: usize, size: usize) -> Result<Self, GroupError> {
        if size == 0 {
            return Err(GroupError::Empty);
        }
        if rank >= size {
            return Err(GroupError::RankOutOfRange { rank, size });
        }
        Ok(Self { rank, size })
    }

    /// Membership of a single-worker run.
    pub fn solo() -> Self {
        Self { rank: 0, size: 1 }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Rank 0 writes the human-readable report.
    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

/// Collective operations available to a worker.
///
/// `barrier` blocks until every member of the group has called it. There is
/// no timeout: a worker that never arrives stalls the whole group.
pub trait ProcessGroup {
    /// This worker's rank and the group size.
    fn membership(&self) -> Membership;

    /// Block until all workers reach this point.
    fn barrier(&self);

    /// Wall-clock seconds from an arbitrary, group-consistent origin.
    fn wtime(&self) -> f64;
}

/// In-process group whose workers are threads sharing one barrier.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    membership: Membership,
    barrier: Arc<Barrier>,
    epoch: Instant,
}

impl LocalGroup {
    /// Create one handle per rank for a group of `size` workers.
    ///
    /// Handle `i` carries rank `i`. Each handle is meant to be moved into
    /// its own worker thread.
    pub fn create(size: usize) -> Result<Vec<LocalGroup>, GroupError> {
        if size == 0 {
            return Err(GroupError::Empty);
        }
        let barrier = Arc::new(Barrier::new(size));
        let epoch = Instant::now();
        (0..size)
            .map(|rank| {
                Ok(LocalGroup {
                    membership: Membership::new(rank, size)?,
                    barrier: Arc::clone(&barrier),
                    epoch,
                })
            })
            .collect()
    }

    /// A group of one; barriers return immediately.
    pub fn solo() -> Self {
        LocalGroup {
            membership: Membership::solo(),
            barrier: Arc::new(Barrier::new(1)),
            epoch: Instant::now(),
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn membership(&self) -> Membership {
        self.membership
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn wtime(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

#[cfg(feature = "mpi")]
pub use self::mpi_group::MpiGroup;

#[cfg(feature = "mpi")]
mod mpi_group {
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    use super::{GroupError, Membership, ProcessGroup};

    /// One worker per MPI process on `MPI_COMM_WORLD`.
    ///
    /// MPI is finalised when this value is dropped.
    pub struct MpiGroup {
        world: SimpleCommunicator,
        membership: Membership,
        // Dropped last: finalises MPI.
        _universe: Universe,
    }

    impl MpiGroup {
        pub fn init() -> Result<Self, GroupError> {
            let universe = mpi::initialize()
                .ok_or_else(|| GroupError::Init("MPI already initialised".into()))?;
            let world = universe.world();
            let rank = usize::try_from(world.rank())
                .map_err(|_| GroupError::Init(format!("negative rank {}", world.rank())))?;
            let size = usize::try_from(world.size())
                .map_err(|_| GroupError::Init(format!("negative size {}", world.size())))?;
            let membership = Membership::new(rank, size)?;
            Ok(Self {
                world,
                membership,
                _universe: universe,
            })
        }
    }

    impl ProcessGroup for MpiGroup {
        fn membership(&self) -> Membership {
            self.membership
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn wtime(&self) -> f64 {
            mpi::time()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_membership_validation() {
        assert_eq!(Membership::new(0, 0), Err(GroupError::Empty));
        assert_eq!(
            Membership::new(3, 3),
            Err(GroupError::RankOutOfRange { rank: 3, size: 3 })
        );
        let m = Membership::new(2, 3).unwrap();
        assert_eq!(m.rank(), 2);
        assert_eq!(m.size(), 3);
        assert!(!m.is_leader());
        assert!(Membership::solo().is_leader());
    }

    #[test]
    fn test_create_assigns_distinct_ranks() {
        let group = LocalGroup::create(4).unwrap();
        let ranks: Vec<usize> = group.iter().map(|g| g.membership().rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(group.iter().all(|g| g.membership().size() == 4));
        assert_eq!(LocalGroup::create(0).unwrap_err(), GroupError::Empty);
    }

    #[test]
    fn test_barrier_orders_phases() {
        // Every worker increments before the barrier; after it, all must
        // observe the full count.
        let size = 6;
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = LocalGroup::create(size)
            .unwrap()
            .into_iter()
            .map(|group| {
                let arrived = Arc::clone(&arrived);
                thread::spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    group.barrier();
                    arrived.load(Ordering::SeqCst)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), size);
        }
    }

    #[test]
    fn test_solo_barrier_does_not_block() {
        let group = LocalGroup::solo();
        group.barrier();
        group.barrier();
        assert!(group.wtime() >= 0.0);
    }
}
