//! Block write pipeline: a single writer per download, fed through a bounded queue.
//!
//! Network tasks only enqueue; the writer thread is the only code that mutates the file's
//! block store. The bounded queue is the backpressure point: `enqueue` waits while the
//! backlog is full.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::store::{BlockStore, StoreError};

enum WriteCommand {
    Block { index: usize, bytes: Vec<u8> },
    /// Acknowledged once every earlier command has been processed.
    Flush(oneshot::Sender<()>),
}

/// Counters reported by the writer when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub written: usize,
    pub rejected: usize,
}

/// Handle to a running writer.
pub struct BlockWritePipeline {
    tx: mpsc::Sender<WriteCommand>,
    worker: JoinHandle<Result<WriteStats, StoreError>>,
}

impl BlockWritePipeline {
    /// Spawn the writer on a dedicated blocking thread. `backlog` is the queue capacity.
    pub fn start(store: Arc<dyn BlockStore>, backlog: usize) -> Self {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        let worker = tokio::task::spawn_blocking(move || run_writer(store, rx));
        Self { tx, worker }
    }

    /// Queue a block for writing; waits while the queue is full.
    pub async fn enqueue(&self, index: usize, bytes: Vec<u8>) -> Result<(), PipelineError> {
        self.tx
            .send(WriteCommand::Block { index, bytes })
            .await
            .map_err(|_| PipelineError::Stopped)
    }

    /// Blocks queued but not yet written.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Wait until everything queued so far has been written or dropped.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Flush(ack_tx))
            .await
            .map_err(|_| PipelineError::Stopped)?;
        ack_rx.await.map_err(|_| PipelineError::Stopped)
    }

    /// Close the queue, let the writer drain it, and collect its counters.
    pub async fn stop(self) -> Result<WriteStats, PipelineError> {
        drop(self.tx);
        match self.worker.await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(PipelineError::Store(e)),
            Err(_) => Err(PipelineError::WriterPanicked),
        }
    }
}

fn run_writer(
    store: Arc<dyn BlockStore>,
    mut rx: mpsc::Receiver<WriteCommand>,
) -> Result<WriteStats, StoreError> {
    let mut stats = WriteStats::default();
    tracing::debug!(file = %store.descriptor().file_hash, "writer running");
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            WriteCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            WriteCommand::Block { index, bytes } if !store.check_block_hash(index, &bytes) => {
                stats.rejected += 1;
                tracing::warn!(block = index, "dropping block with wrong hash");
            }
            WriteCommand::Block { index, bytes } => match store.write_block(index, &bytes) {
                Ok(true) => {
                    stats.written += 1;
                    tracing::trace!(block = index, "block written");
                }
                Ok(false) => {
                    stats.rejected += 1;
                    tracing::warn!(block = index, "dropping block with wrong hash");
                }
                Err(StoreError::OutOfRange { index, num_blocks }) => {
                    stats.rejected += 1;
                    tracing::warn!(block = index, num_blocks, "dropping out-of-range block");
                }
                Err(e) => {
                    tracing::error!(block = index, error = %e, "block write failed");
                    return Err(e);
                }
            },
        }
    }
    tracing::debug!(
        written = stats.written,
        rejected = stats.rejected,
        "writer stopped"
    );
    Ok(stats)
}

/// Error talking to the writer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("write pipeline stopped")]
    Stopped,
    #[error("writer thread panicked")]
    WriterPanicked,
    #[error("storage failure: {0}")]
    Store(#[source] StoreError),
}
