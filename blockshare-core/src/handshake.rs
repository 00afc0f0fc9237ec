//! Connect-authenticate exchange, used for index-server and sharing-peer sessions.
//!
//! Client: connect (bounded by the connect timeout), send `AuthenticateRequest`, skip any
//! `WelcomeMsg`, then expect `AuthenticateReply`. Server: send `WelcomeMsg`, read the
//! `AuthenticateRequest`, answer with the verdict of a caller-supplied check.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::channel::{Channel, ChannelError};
use crate::protocol::Message;

/// Informational messages tolerated before the authentication reply.
const MAX_PREAMBLE_MESSAGES: usize = 8;

/// Open a TCP connection to `host:port` and authenticate with `secret`.
/// On success the channel is ready for protocol-specific requests.
pub async fn connect(
    host: &str,
    port: u16,
    secret: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Channel, HandshakeError> {
    let endpoint = format!("{}:{}", host, port);
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await
    {
        Err(_) => return Err(HandshakeError::ConnectTimeout(endpoint)),
        Ok(Err(source)) => return Err(HandshakeError::Connect { endpoint, source }),
        Ok(Ok(stream)) => stream,
    };
    let mut channel = Channel::from_tcp(stream, read_timeout);
    authenticate(&mut channel, secret).await?;
    tracing::debug!(peer = %endpoint, "authenticated");
    Ok(channel)
}

/// Client half on an already-connected channel.
pub async fn authenticate<S>(channel: &mut Channel<S>, secret: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel
        .send(&Message::AuthenticateRequest {
            secret: secret.to_string(),
        })
        .await?;
    for _ in 0..MAX_PREAMBLE_MESSAGES {
        match channel.receive().await? {
            Message::WelcomeMsg { text } => {
                tracing::debug!(peer = %channel.peer(), welcome = %text, "welcome received");
            }
            Message::AuthenticateReply { success: true } => return Ok(()),
            Message::AuthenticateReply { success: false } => return Err(HandshakeError::Rejected),
            Message::ErrorMsg { text } => return Err(HandshakeError::Refused(text)),
            other => return Err(HandshakeError::UnexpectedMessage(other.kind())),
        }
    }
    Err(HandshakeError::UnexpectedMessage("WelcomeMsg"))
}

/// Server half. `verify` decides whether the presented secret is acceptable.
/// Returns the accepted secret; on rejection the reply has been sent and the caller should close.
pub async fn accept<S, F, Fut>(
    channel: &mut Channel<S>,
    welcome: &str,
    verify: F,
) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = bool>,
{
    channel
        .send(&Message::WelcomeMsg {
            text: welcome.to_string(),
        })
        .await?;
    let secret = match channel.receive().await {
        Ok(Message::AuthenticateRequest { secret }) => secret,
        Ok(other) => {
            let _ = channel
                .send(&Message::error("expecting AuthenticateRequest"))
                .await;
            return Err(HandshakeError::UnexpectedMessage(other.kind()));
        }
        Err(ChannelError::MalformedMessage(text)) => {
            let _ = channel.send(&Message::error("invalid message")).await;
            return Err(ChannelError::MalformedMessage(text).into());
        }
        Err(e) => return Err(e.into()),
    };
    let accepted = verify(secret.clone()).await;
    channel
        .send(&Message::AuthenticateReply { success: accepted })
        .await?;
    if accepted {
        Ok(secret)
    } else {
        Err(HandshakeError::Rejected)
    }
}

/// Handshake failure. Every variant means "cannot use this endpoint now".
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication rejected")]
    Rejected,
    #[error("refused: {0}")]
    Refused(String),
    #[error("unexpected {0} during handshake")]
    UnexpectedMessage(&'static str),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
