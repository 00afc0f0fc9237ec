//! File descriptor: split a file into fixed-size blocks, hash each block and the whole file.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::integrity::{self, FileHasher};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 256 * 1024; // 256 KiB

/// Byte range covered by one block: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `total_len` bytes into blocks of `block_size`; the last block may be short.
/// A zero block size falls back to [`DEFAULT_BLOCK_SIZE`].
pub fn split_into_blocks(total_len: u64, block_size: u32) -> Vec<BlockRange> {
    let size = effective_block_size(block_size) as u64;
    let mut out = Vec::new();
    let mut start = 0u64;
    while start < total_len {
        let end = start.saturating_add(size).min(total_len);
        out.push(BlockRange {
            index: out.len(),
            start,
            end,
        });
        start = end;
    }
    out
}

fn effective_block_size(block_size: u32) -> u32 {
    if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    }
}

/// Identity of a shared file: whole-file hash, length, block size and per-block hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub file_hash: String,
    pub file_length: u64,
    pub block_size: u32,
    pub block_hashes: Vec<String>,
}

impl FileDescriptor {
    /// Describe an in-memory file.
    pub fn from_bytes(data: &[u8], block_size: u32) -> Self {
        let block_size = effective_block_size(block_size);
        let block_hashes = split_into_blocks(data.len() as u64, block_size)
            .iter()
            .map(|r| integrity::hash_block(&data[r.start as usize..r.end as usize]))
            .collect();
        Self {
            file_hash: integrity::hash_block(data),
            file_length: data.len() as u64,
            block_size,
            block_hashes,
        }
    }

    /// Describe a file by streaming it block by block.
    pub fn from_reader<R: Read>(mut reader: R, block_size: u32) -> io::Result<Self> {
        let block_size = effective_block_size(block_size);
        let mut whole = FileHasher::new();
        let mut block_hashes = Vec::new();
        let mut file_length = 0u64;
        let mut buf = vec![0u8; block_size as usize];
        loop {
            let n = read_full(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            whole.update(&buf[..n]);
            block_hashes.push(integrity::hash_block(&buf[..n]));
            file_length += n as u64;
            if n < buf.len() {
                break;
            }
        }
        Ok(Self {
            file_hash: whole.finish(),
            file_length,
            block_size,
            block_hashes,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.block_hashes.len()
    }

    pub fn block_hash(&self, index: usize) -> Option<&str> {
        self.block_hashes.get(index).map(String::as_str)
    }

    /// Byte range of block `index`, or `None` when out of range.
    pub fn block_range(&self, index: usize) -> Option<BlockRange> {
        if index >= self.num_blocks() {
            return None;
        }
        let size = self.block_size as u64;
        let start = (index as u64).saturating_mul(size).min(self.file_length);
        let end = start.saturating_add(size).min(self.file_length);
        Some(BlockRange { index, start, end })
    }

    /// Block count agrees with length and block size. Descriptors from the wire are checked with this.
    pub fn is_consistent(&self) -> bool {
        self.block_size > 0
            && self.file_length.div_ceil(self.block_size as u64) == self.num_blocks() as u64
    }
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_blocks() {
        let blocks = split_into_blocks(100, 30);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].end, 30);
        assert_eq!(blocks[3].index, 3);
        assert_eq!(blocks[3].start, 90);
        assert_eq!(blocks[3].end, 100);
    }

    #[test]
    fn split_exact_multiple() {
        let blocks = split_into_blocks(90, 30);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].end, 90);
    }

    #[test]
    fn split_zero_length() {
        assert!(split_into_blocks(0, 30).is_empty());
    }

    #[test]
    fn split_zero_block_size_uses_default() {
        let blocks = split_into_blocks(DEFAULT_BLOCK_SIZE as u64 * 2, 0);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn reader_and_bytes_agree() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let a = FileDescriptor::from_bytes(&data, 64);
        let b = FileDescriptor::from_reader(&data[..], 64).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.num_blocks(), 16);
        assert_eq!(a.block_range(15).map(|r| r.len()), Some(1000 - 15 * 64));
        assert!(a.is_consistent());
    }

    #[test]
    fn block_range_out_of_bounds() {
        let d = FileDescriptor::from_bytes(b"abcdef", 4);
        assert_eq!(d.num_blocks(), 2);
        assert_eq!(d.block_range(1).map(|r| (r.start, r.end)), Some((4, 6)));
        assert!(d.block_range(2).is_none());
        assert!(d.block_hash(2).is_none());
    }

    #[test]
    fn inconsistent_descriptor_detected() {
        let mut d = FileDescriptor::from_bytes(b"abcdef", 4);
        d.block_hashes.push(integrity::hash_block(b"extra"));
        assert!(!d.is_consistent());
    }

    #[test]
    fn huge_advertised_length_is_rejected_quickly() {
        let d = FileDescriptor {
            file_hash: "00".into(),
            file_length: u64::MAX,
            block_size: 1,
            block_hashes: vec!["00".into()],
        };
        assert!(!d.is_consistent());
        let last = FileDescriptor {
            block_size: u32::MAX,
            ..d
        };
        assert!(!last.is_consistent());
        assert_eq!(last.block_range(0).map(|r| r.end), Some(u32::MAX as u64));
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let d = FileDescriptor::from_bytes(b"abc", 2);
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("fileHash").is_some());
        assert!(v.get("blockHashes").is_some());
        assert_eq!(v["fileLength"], 3);
    }
}
