//! Block store: block-addressed file storage with per-block hash verification.
//!
//! The transfer code only sees the [`BlockStore`] trait. [`FileBlockStore`] keeps the file
//! on disk and serialises every block read and write, so a reader never sees a torn block.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::descriptor::FileDescriptor;
use crate::integrity;

/// Storage for one file's blocks.
pub trait BlockStore: Send + Sync {
    fn descriptor(&self) -> &FileDescriptor;

    fn num_blocks(&self) -> usize {
        self.descriptor().num_blocks()
    }

    /// Expected hash of block `index` according to the descriptor.
    fn block_hash(&self, index: usize) -> Option<&str> {
        self.descriptor().block_hash(index)
    }

    /// Whether `bytes` hash to the expected value for block `index`.
    fn check_block_hash(&self, index: usize, bytes: &[u8]) -> bool {
        self.block_hash(index)
            .map(|expected| integrity::verify_block(bytes, expected))
            .unwrap_or(false)
    }

    fn is_block_available(&self, index: usize) -> bool;

    fn read_block(&self, index: usize) -> Result<Vec<u8>, StoreError>;

    /// Persist block `index`. Returns `Ok(false)` without writing when the bytes fail the hash check.
    fn write_block(&self, index: usize, bytes: &[u8]) -> Result<bool, StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}

/// Indices the store holds no verified content for. Stores only report a block available
/// after checking it against the descriptor (on open or on write).
pub fn missing_blocks(store: &dyn BlockStore) -> Vec<usize> {
    (0..store.num_blocks())
        .filter(|&i| !store.is_block_available(i))
        .collect()
}

/// Error from a block store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("block {0} is not available")]
    BlockUnavailable(usize),
    #[error("block index {index} out of range (file has {num_blocks} blocks)")]
    OutOfRange { index: usize, num_blocks: usize },
    #[error("descriptor is inconsistent with its block count")]
    InvalidDescriptor,
    #[error("store lock poisoned")]
    Poisoned,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct Inner {
    file: File,
    available: Vec<bool>,
}

/// File-backed block store.
pub struct FileBlockStore {
    path: PathBuf,
    descriptor: FileDescriptor,
    writable: bool,
    inner: Mutex<Inner>,
}

impl FileBlockStore {
    /// Create or resume a file sized for `descriptor`. Blocks already on disk that match
    /// their hash are marked available.
    pub fn open(path: impl AsRef<Path>, descriptor: FileDescriptor) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !descriptor.is_consistent() {
            return Err(StoreError::InvalidDescriptor);
        }
        let io_err = |source: io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        if len != descriptor.file_length {
            file.set_len(descriptor.file_length).map_err(io_err)?;
        }
        let available = scan(&mut file, &descriptor).map_err(io_err)?;
        let present = available.iter().filter(|a| **a).count();
        tracing::debug!(
            file = %path.display(),
            blocks = descriptor.num_blocks(),
            present,
            "opened block store"
        );
        Ok(Self {
            path,
            descriptor,
            writable: true,
            inner: Mutex::new(Inner { file, available }),
        })
    }

    /// Open a complete local file read-only, computing its descriptor from the contents.
    pub fn open_existing(path: impl AsRef<Path>, block_size: u32) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).map_err(io_err)?;
        let descriptor =
            FileDescriptor::from_reader(io::BufReader::new(&mut file), block_size).map_err(io_err)?;
        let available = vec![true; descriptor.num_blocks()];
        Ok(Self {
            path,
            descriptor,
            writable: false,
            inner: Mutex::new(Inner { file, available }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index >= self.descriptor.num_blocks() {
            return Err(StoreError::OutOfRange {
                index,
                num_blocks: self.descriptor.num_blocks(),
            });
        }
        Ok(())
    }
}

fn scan(file: &mut File, descriptor: &FileDescriptor) -> io::Result<Vec<bool>> {
    let mut available = Vec::with_capacity(descriptor.num_blocks());
    let mut buf = vec![0u8; descriptor.block_size as usize];
    for index in 0..descriptor.num_blocks() {
        let Some(range) = descriptor.block_range(index) else {
            available.push(false);
            continue;
        };
        let bytes = &mut buf[..range.len()];
        file.seek(SeekFrom::Start(range.start))?;
        file.read_exact(bytes)?;
        let ok = descriptor
            .block_hash(index)
            .map(|h| integrity::verify_block(bytes, h))
            .unwrap_or(false);
        available.push(ok);
    }
    Ok(available)
}

impl BlockStore for FileBlockStore {
    fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    fn is_block_available(&self, index: usize) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.available.get(index).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    fn read_block(&self, index: usize) -> Result<Vec<u8>, StoreError> {
        self.check_index(index)?;
        let range = self
            .descriptor
            .block_range(index)
            .ok_or(StoreError::BlockUnavailable(index))?;
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if !inner.available[index] {
            return Err(StoreError::BlockUnavailable(index));
        }
        let mut bytes = vec![0u8; range.len()];
        inner
            .file
            .seek(SeekFrom::Start(range.start))
            .map_err(|e| self.io_err(e))?;
        inner
            .file
            .read_exact(&mut bytes)
            .map_err(|e| self.io_err(e))?;
        Ok(bytes)
    }

    fn write_block(&self, index: usize, bytes: &[u8]) -> Result<bool, StoreError> {
        self.check_index(index)?;
        if !self.check_block_hash(index, bytes) {
            return Ok(false);
        }
        let range = self
            .descriptor
            .block_range(index)
            .ok_or(StoreError::BlockUnavailable(index))?;
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner
            .file
            .seek(SeekFrom::Start(range.start))
            .map_err(|e| self.io_err(e))?;
        inner.file.write_all(bytes).map_err(|e| self.io_err(e))?;
        inner.available[index] = true;
        Ok(true)
    }

    fn close(&self) -> Result<(), StoreError> {
        if !self.writable {
            return Ok(());
        }
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.file.sync_data().map_err(|e| self.io_err(e))
    }
}
