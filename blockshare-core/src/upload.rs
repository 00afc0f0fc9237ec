//! Upload server: accept peer connections and serve blocks of actively shared files.
//!
//! The accept loop hands connections to a bounded queue (full queue: drop with a warning);
//! a dispatcher gives every dequeued connection its own task. Per connection: accepting
//! handshake, then any number of `BlockRequest`s until `Goodbye`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelError};
use crate::config::Config;
use crate::handshake;
use crate::protocol::Message;
use crate::shares::ShareRegistry;
use crate::store::StoreError;

/// Default greeting sent before authentication.
pub const DEFAULT_WELCOME: &str = "welcome to blockshare peer";

pub struct UploadServer {
    listener: TcpListener,
    shares: Arc<ShareRegistry>,
    config: Config,
    welcome: String,
    shutdown: CancellationToken,
}

impl UploadServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        shares: Arc<ShareRegistry>,
        config: Config,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            shares,
            config: config.normalized(),
            welcome: DEFAULT_WELCOME.to_string(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = welcome.into();
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token stops the accept loop and aborts in-flight connections.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept until shut down.
    pub async fn run(self) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!(%addr, "upload server listening");
        let (queue_tx, queue_rx) = mpsc::channel(self.config.incoming_queue);
        let ctx = Arc::new(WorkerContext {
            shares: self.shares.clone(),
            config: self.config.clone(),
            welcome: self.welcome.clone(),
        });
        let dispatcher = tokio::spawn(dispatch(queue_rx, ctx, self.shutdown.clone()));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => match queue_tx.try_send((stream, peer)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(%peer, "dropped connection: incoming queue is full");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }
        drop(queue_tx);
        self.shutdown.cancel();
        let _ = dispatcher.await;
        tracing::info!(%addr, "upload server stopped");
        Ok(())
    }
}

struct WorkerContext {
    shares: Arc<ShareRegistry>,
    config: Config,
    welcome: String,
}

async fn dispatch(
    mut queue: mpsc::Receiver<(TcpStream, SocketAddr)>,
    ctx: Arc<WorkerContext>,
    shutdown: CancellationToken,
) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some((stream, peer)) => {
                    workers.spawn(serve_connection(stream, peer, ctx.clone()));
                }
                None => break,
            },
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }
    if !workers.is_empty() {
        tracing::debug!(active = workers.len(), "aborting upload connections");
    }
    workers.shutdown().await;
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<WorkerContext>) {
    let mut channel = Channel::from_tcp(stream, ctx.config.upload_idle_timeout());
    let shares = ctx.shares.clone();
    let secret = match handshake::accept(&mut channel, &ctx.welcome, |s| async move {
        shares.has_secret(&s).await
    })
    .await
    {
        Ok(secret) => secret,
        Err(e) => {
            tracing::info!(%peer, error = %e, "upload handshake failed");
            channel.close().await;
            return;
        }
    };

    let mut served = 0usize;
    loop {
        let msg = match channel.receive().await {
            Ok(msg) => msg,
            Err(ChannelError::MalformedMessage(text)) => {
                tracing::warn!(%peer, error = %text, "malformed message");
                let _ = channel.send(&Message::error("invalid message")).await;
                break;
            }
            Err(ChannelError::Timeout) => {
                tracing::info!(%peer, "upload connection idle, closing");
                break;
            }
            Err(ChannelError::ConnectionClosed) => {
                tracing::debug!(%peer, "peer closed without goodbye");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "upload connection failed");
                break;
            }
        };
        match msg {
            Message::BlockRequest {
                filename,
                block_hash,
                block_index,
            } => {
                let reply =
                    answer_block_request(&ctx.shares, &secret, filename, &block_hash, block_index)
                        .await;
                if let Message::ErrorMsg { text } = &reply {
                    tracing::info!(%peer, block = block_index, reason = %text, "block request refused");
                } else {
                    served += 1;
                }
                if let Err(e) = channel.send(&reply).await {
                    tracing::warn!(%peer, error = %e, "could not send reply");
                    break;
                }
            }
            Message::Goodbye => {
                let _ = channel.send(&Message::Goodbye).await;
                break;
            }
            other => {
                tracing::warn!(%peer, kind = other.kind(), "unexpected message");
                let _ = channel
                    .send(&Message::error(format!("unexpected {}", other.kind())))
                    .await;
                break;
            }
        }
    }
    channel.close().await;
    tracing::info!(%peer, served, "upload connection finished");
}

/// Build the reply to one block request. Dropped shares, foreign secrets, stale hashes and
/// unavailable blocks all yield `ErrorMsg`.
async fn answer_block_request(
    shares: &ShareRegistry,
    secret: &str,
    filename: String,
    block_hash: &str,
    block_index: usize,
) -> Message {
    let Some(entry) = shares.get(&filename).await else {
        return Message::error(format!("{} is not shared", filename));
    };
    if entry.secret != secret {
        return Message::error(format!("not authorised for {}", filename));
    }
    match entry.store.block_hash(block_index) {
        None => return Message::error(format!("block {} out of range", block_index)),
        Some(expected) if !expected.eq_ignore_ascii_case(block_hash) => {
            return Message::error(format!("block {} hash mismatch", block_index));
        }
        Some(_) => {}
    }
    let store = entry.store.clone();
    match tokio::task::spawn_blocking(move || store.read_block(block_index)).await {
        Ok(Ok(data)) => Message::BlockReply {
            filename,
            file_hash: entry.store.descriptor().file_hash.clone(),
            block_index,
            data,
        },
        Ok(Err(StoreError::BlockUnavailable(_))) => {
            Message::error(format!("block {} is not available", block_index))
        }
        Ok(Err(e)) => {
            tracing::error!(file = %filename, block = block_index, error = %e, "block read failed");
            Message::error(format!("block {} could not be read", block_index))
        }
        Err(_) => Message::error(format!("block {} could not be read", block_index)),
    }
}
