//! Sharded parallel store.
//!
//! Each artifact is a flat file of native-endian `f32` values holding one
//! fixed-size shard per rank, in rank order, with no header. Rank `r` owns
//! bytes `[r × shard_bytes, (r + 1) × shard_bytes)`. Every call opens the
//! file, performs one positioned read or write of exactly one shard, and
//! closes it again, so concurrent workers never share a file handle.

use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::workload::Workload;

/// File holding every rank's copy of matrix one.
pub const LHS_FILE: &str = "matrix_One.bin";
/// File holding every rank's copy of matrix two.
pub const RHS_FILE: &str = "matrix_Two.bin";
/// File holding every rank's result.
pub const RESULT_FILE: &str = "matrix_Result.bin";

const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Errors from shard I/O. All of them are fatal to the worker.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Shard of rank {rank} in {path} is truncated: expected {expected} bytes at offset {offset}")]
    Truncated {
        path: PathBuf,
        rank: usize,
        offset: u64,
        expected: usize,
    },

    #[error("Buffer of {got} elements does not match shard length {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("{path} is {actual} bytes, layout for {ranks} ranks requires {expected}")]
    LayoutMismatch {
        path: PathBuf,
        ranks: usize,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One shared file split into equal per-rank shards.
#[derive(Debug, Clone)]
pub struct ShardStore {
    path: PathBuf,
    shard_len: usize,
}

impl ShardStore {
    /// A store at `path` whose shards hold `shard_len` elements each.
    pub fn new(path: impl Into<PathBuf>, shard_len: usize) -> Self {
        Self {
            path: path.into(),
            shard_len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Elements per shard.
    pub fn shard_len(&self) -> usize {
        self.shard_len
    }

    /// Bytes per shard.
    pub fn shard_bytes(&self) -> u64 {
        (self.shard_len * ELEMENT_SIZE) as u64
    }

    /// Byte range owned by `rank`.
    pub fn shard_range(&self, rank: usize) -> Range<u64> {
        let start = rank as u64 * self.shard_bytes();
        start..start + self.shard_bytes()
    }

    /// Total file size for a group of `size` workers.
    pub fn file_len(&self, size: usize) -> u64 {
        size as u64 * self.shard_bytes()
    }

    /// Write `data` as `rank`'s shard, creating the file if needed.
    ///
    /// The file is never truncated, so other ranks' shards are left intact.
    pub fn write_shard(&self, rank: usize, data: &[f32]) -> Result<(), StoreError> {
        self.check_len(data.len())?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;

        let offset = self.shard_range(rank).start;
        write_all_at(&file, bytemuck::cast_slice(data), offset).map_err(|source| {
            self.classify(source, rank, offset)
        })?;
        log::trace!(
            "wrote {} bytes at offset {} of {}",
            self.shard_bytes(),
            offset,
            self.path.display()
        );
        Ok(())
    }

    /// Read `rank`'s shard into `buffer`.
    pub fn read_shard_into(&self, rank: usize, buffer: &mut [f32]) -> Result<(), StoreError> {
        self.check_len(buffer.len())?;
        let file = File::open(&self.path).map_err(|source| StoreError::Open {
            path: self.path.clone(),
            source,
        })?;

        let offset = self.shard_range(rank).start;
        read_exact_at(&file, bytemuck::cast_slice_mut(buffer), offset)
            .map_err(|source| self.classify(source, rank, offset))
    }

    /// Read `rank`'s shard into a new buffer.
    pub fn read_shard(&self, rank: usize) -> Result<Vec<f32>, StoreError> {
        let mut buffer = vec![0.0f32; self.shard_len];
        self.read_shard_into(rank, &mut buffer)?;
        Ok(buffer)
    }

    /// Cut off anything past the last of `size` shards, left by an earlier
    /// run with a larger layout. Returns whether the file was shortened.
    ///
    /// Never extends the file, so a shard that was not written still reads
    /// as truncated. Safe to call while peers write: their shards all lie
    /// below the new length.
    pub fn discard_stale_tail(&self, size: usize) -> Result<bool, StoreError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let actual = file.metadata().map_err(io_err)?.len();
        let expected = self.file_len(size);
        if actual <= expected {
            return Ok(false);
        }
        file.set_len(expected).map_err(io_err)?;
        log::debug!(
            "discarded {} stale bytes from {}",
            actual - expected,
            self.path.display()
        );
        Ok(true)
    }

    /// Check that the file on disk has exactly the size implied by `size` ranks.
    pub fn check_layout(&self, size: usize) -> Result<(), StoreError> {
        let actual = std::fs::metadata(&self.path)
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?
            .len();
        let expected = self.file_len(size);
        if actual != expected {
            return Err(StoreError::LayoutMismatch {
                path: self.path.clone(),
                ranks: size,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn check_len(&self, got: usize) -> Result<(), StoreError> {
        if got != self.shard_len {
            return Err(StoreError::LengthMismatch {
                expected: self.shard_len,
                got,
            });
        }
        Ok(())
    }

    fn classify(&self, source: io::Error, rank: usize, offset: u64) -> StoreError {
        match source.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => StoreError::Truncated {
                path: self.path.clone(),
                rank,
                offset,
                expected: self.shard_bytes() as usize,
            },
            _ => StoreError::Io {
                path: self.path.clone(),
                source,
            },
        }
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, bytes: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(bytes, offset)
}

#[cfg(unix)]
fn read_exact_at(file: &File, bytes: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(bytes, offset)
}

#[cfg(not(unix))]
fn write_all_at(mut file: &File, bytes: &[u8], offset: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn read_exact_at(mut file: &File, bytes: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(bytes)
}

/// The three shard files of one run, laid out for a given workload.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub lhs: ShardStore,
    pub rhs: ShardStore,
    pub result: ShardStore,
}

impl Artifacts {
    /// Stores under `dir` with shard sizes taken from `workload`.
    pub fn new(dir: &Path, workload: &Workload) -> Self {
        Self {
            lhs: ShardStore::new(dir.join(LHS_FILE), workload.lhs_len()),
            rhs: ShardStore::new(dir.join(RHS_FILE), workload.rhs_len()),
            result: ShardStore::new(dir.join(RESULT_FILE), workload.result_len()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardStore> {
        [&self.lhs, &self.rhs, &self.result].into_iter()
    }
}
