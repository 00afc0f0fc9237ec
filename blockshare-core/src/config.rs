//! Transfer tunables shared by the downloader, the upload server and the index client.

use std::time::Duration;

use serde::Deserialize;

use crate::descriptor::DEFAULT_BLOCK_SIZE;

/// Transfer configuration. Usually embedded as a `[transfer]` table in the daemon config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP connect timeout in milliseconds (default 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-message read timeout in milliseconds (default 5000).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Index re-query rounds after the first source list is exhausted (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Blocks fetched from one connection before rotating to the next source (default 32).
    #[serde(default = "default_max_blocks_per_connection")]
    pub max_blocks_per_connection: usize,
    /// Pending writes tolerated before block requests pause (default 5).
    #[serde(default = "default_write_backlog")]
    pub write_backlog: usize,
    /// Accepted connections waiting for a worker before new ones are dropped (default 64).
    #[serde(default = "default_incoming_queue")]
    pub incoming_queue: usize,
    /// Upload-side idle timeout in milliseconds (default 10000).
    #[serde(default = "default_upload_idle_timeout_ms")]
    pub upload_idle_timeout_ms: u64,
    /// Block size used when describing files this node shares (default 256 KiB).
    #[serde(default = "default_block_size")]
    pub block_size: u32,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_blocks_per_connection() -> usize {
    32
}
fn default_write_backlog() -> usize {
    5
}
fn default_incoming_queue() -> usize {
    64
}
fn default_upload_idle_timeout_ms() -> u64 {
    10_000
}
fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_retries: default_max_retries(),
            max_blocks_per_connection: default_max_blocks_per_connection(),
            write_backlog: default_write_backlog(),
            incoming_queue: default_incoming_queue(),
            upload_idle_timeout_ms: default_upload_idle_timeout_ms(),
            block_size: default_block_size(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_idle_timeout_ms)
    }

    /// Zero capacities would deadlock the pipeline or drop every connection; clamp them to one.
    pub fn normalized(mut self) -> Self {
        self.max_blocks_per_connection = self.max_blocks_per_connection.max(1);
        self.write_backlog = self.write_backlog.max(1);
        self.incoming_queue = self.incoming_queue.max(1);
        self.block_size = self.block_size.max(1);
        self
    }
}
