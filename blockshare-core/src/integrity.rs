//! Integrity: per-block content hash (SHA-256, lowercase hex), verify on receive.

use sha2::{Digest, Sha256};

/// Hash a block payload. Returns the lowercase hex digest carried on the wire.
pub fn hash_block(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Verify block payload against an expected hex hash. Comparison ignores hex case.
pub fn verify_block(payload: &[u8], expected_hash: &str) -> bool {
    hash_block(payload).eq_ignore_ascii_case(expected_hash)
}

/// Streaming hasher for whole-file digests.
pub struct FileHasher {
    inner: Sha256,
}

impl FileHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for FileHasher {
    fn default() -> Self {
        Self::new()
    }
}
