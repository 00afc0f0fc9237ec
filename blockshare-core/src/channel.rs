//! Session channel: one socket plus its line-framed reader/writer.

use std::io;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::protocol::Message;
use crate::wire::{self, WireError, MAX_LINE_LEN};

/// A framed, message-level connection. Every send flushes; every receive waits for one
/// full line, bounded by the read timeout.
pub struct Channel<S = TcpStream> {
    framed: Framed<S, LinesCodec>,
    peer: String,
    read_timeout: Duration,
}

impl Channel<TcpStream> {
    /// Wrap a connected TCP stream; the peer label is its remote address.
    pub fn from_tcp(stream: TcpStream, read_timeout: Duration) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let _ = stream.set_nodelay(true);
        Self::new(stream, peer, read_timeout)
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN)),
            peer: peer.into(),
            read_timeout,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one message plus line terminator and flush.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ChannelError> {
        let line = wire::encode_line(msg).map_err(ChannelError::Encode)?;
        tracing::trace!(peer = %self.peer, kind = msg.kind(), "sending");
        self.framed.send(line).await.map_err(ChannelError::from)
    }

    /// Read one line and decode it.
    pub async fn receive(&mut self) -> Result<Message, ChannelError> {
        let next = tokio::time::timeout(self.read_timeout, self.framed.next())
            .await
            .map_err(|_| ChannelError::Timeout)?;
        let line = match next {
            None => return Err(ChannelError::ConnectionClosed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(line)) => line,
        };
        let msg = wire::decode_line(&line).map_err(|e| match e {
            WireError::TooLarge => ChannelError::MalformedMessage("line too long".into()),
            other => ChannelError::MalformedMessage(other.to_string()),
        })?;
        tracing::trace!(peer = %self.peer, kind = msg.kind(), "received");
        Ok(msg)
    }

    /// Flush and shut down the write half. Errors are ignored; the socket is dropped either way.
    pub async fn close(mut self) {
        let _ = SinkExt::<String>::close(&mut self.framed).await;
    }

    /// Best-effort `Goodbye`, then close.
    pub async fn goodbye(mut self) {
        if let Err(e) = self.send(&Message::Goodbye).await {
            tracing::debug!(peer = %self.peer, error = %e, "goodbye not delivered");
        }
        self.close().await;
    }
}

/// Error on a session channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("read timed out")]
    Timeout,
    #[error("cannot encode message: {0}")]
    Encode(#[source] WireError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for ChannelError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                ChannelError::MalformedMessage("line too long".into())
            }
            LinesCodecError::Io(e) => match e.kind() {
                io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => ChannelError::ConnectionClosed,
                // LinesCodec reports non-UTF-8 lines this way
                io::ErrorKind::InvalidData => ChannelError::MalformedMessage(e.to_string()),
                _ => ChannelError::Io(e),
            },
        }
    }
}
