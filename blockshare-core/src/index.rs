//! Index server client: lookup, share, search and drop-share requests.
//!
//! Each request is its own session: handshake, one request, one reply, close.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelError};
use crate::config::Config;
use crate::descriptor::FileDescriptor;
use crate::handshake::{self, HandshakeError};
use crate::protocol::{Message, Source};

/// Address and secret of an index server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexEndpoint {
    pub host: String,
    pub port: u16,
    pub secret: String,
}

impl std::fmt::Display for IndexEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A search result: a sharing peer and how many peers share that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub source: Source,
    pub seed_count: u32,
}

/// Where the downloader gets its source lists from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn lookup(&self, filename: &str, file_hash: &str) -> Result<Vec<Source>, IndexError>;
}

/// Index request failure.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("index server error: {0}")]
    Refused(String),
    #[error("unexpected {0} from index server")]
    UnexpectedReply(&'static str),
}

/// Client for one index server.
#[derive(Debug, Clone)]
pub struct IndexClient {
    endpoint: IndexEndpoint,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl IndexClient {
    pub fn new(endpoint: IndexEndpoint, config: &Config) -> Self {
        Self {
            endpoint,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        }
    }

    pub fn endpoint(&self) -> &IndexEndpoint {
        &self.endpoint
    }

    async fn request(&self, msg: Message) -> Result<Message, IndexError> {
        let mut channel: Channel = handshake::connect(
            &self.endpoint.host,
            self.endpoint.port,
            &self.endpoint.secret,
            self.connect_timeout,
            self.read_timeout,
        )
        .await?;
        let kind = msg.kind();
        channel.send(&msg).await?;
        let reply = channel.receive().await;
        channel.close().await;
        let reply = reply?;
        tracing::debug!(index = %self.endpoint, request = kind, reply = reply.kind(), "index exchange");
        match reply {
            Message::ErrorMsg { text } => Err(IndexError::Refused(text)),
            other => Ok(other),
        }
    }

    /// Advertise a file. Returns the sharer count reported by the server.
    pub async fn share(
        &self,
        descriptor: &FileDescriptor,
        filename: &str,
        share_secret: &str,
        port: u16,
    ) -> Result<u32, IndexError> {
        let reply = self
            .request(Message::ShareRequest {
                file_descriptor: descriptor.clone(),
                filename: filename.to_string(),
                secret: share_secret.to_string(),
                port,
            })
            .await?;
        match reply {
            Message::ShareReply { num_sharers } => Ok(num_sharers),
            other => Err(IndexError::UnexpectedReply(other.kind())),
        }
    }

    pub async fn search(&self, keywords: &[String], max_hits: u32) -> Result<Vec<SearchHit>, IndexError> {
        let reply = self
            .request(Message::SearchRequest {
                max_hits,
                keywords: keywords.to_vec(),
            })
            .await?;
        match reply {
            Message::SearchReply { hits, seed_counts } => Ok(hits
                .into_iter()
                .enumerate()
                .map(|(i, source)| SearchHit {
                    seed_count: seed_counts.get(i).copied().unwrap_or(0),
                    source,
                })
                .collect()),
            other => Err(IndexError::UnexpectedReply(other.kind())),
        }
    }

    /// Withdraw an advertised file. Returns the server's verdict.
    pub async fn drop_share(
        &self,
        filename: &str,
        file_hash: &str,
        share_secret: &str,
        port: u16,
    ) -> Result<bool, IndexError> {
        let reply = self
            .request(Message::DropShareRequest {
                filename: filename.to_string(),
                file_hash: file_hash.to_string(),
                secret: share_secret.to_string(),
                port,
            })
            .await?;
        match reply {
            Message::DropShareReply { success } => Ok(success),
            other => Err(IndexError::UnexpectedReply(other.kind())),
        }
    }
}

#[async_trait]
impl SourceProvider for IndexClient {
    async fn lookup(&self, filename: &str, file_hash: &str) -> Result<Vec<Source>, IndexError> {
        let reply = self
            .request(Message::LookupRequest {
                filename: filename.to_string(),
                file_hash: file_hash.to_string(),
            })
            .await?;
        match reply {
            Message::LookupReply { sources } => Ok(sources),
            other => Err(IndexError::UnexpectedReply(other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal index server: authenticates with `secret` and answers one request via `reply`.
    async fn fake_index<F>(secret: &'static str, reply: F) -> IndexEndpoint
    where
        F: Fn(Message) -> Message + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut ch = Channel::from_tcp(stream, Duration::from_secs(2));
                let ok = handshake::accept(&mut ch, "index", |s| async move { s == secret }).await;
                if ok.is_err() {
                    continue;
                }
                if let Ok(req) = ch.receive().await {
                    let _ = ch.send(&reply(req)).await;
                }
            }
        });
        IndexEndpoint {
            host: "127.0.0.1".into(),
            port,
            secret: secret.into(),
        }
    }

    fn client(endpoint: IndexEndpoint) -> IndexClient {
        IndexClient::new(endpoint, &Config::default())
    }

    #[tokio::test]
    async fn lookup_returns_sources() {
        let d = FileDescriptor::from_bytes(b"hello", 2);
        let d2 = d.clone();
        let ep = fake_index("idx", move |req| match req {
            Message::LookupRequest { filename, .. } => Message::LookupReply {
                sources: vec![Source {
                    ip: "127.0.0.1".into(),
                    port: 9,
                    filename,
                    file_descriptor: d2.clone(),
                    secret: "s".into(),
                }],
            },
            _ => Message::error("bad"),
        })
        .await;
        let sources = client(ep).lookup("a.txt", &d.file_hash).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].filename, "a.txt");
    }

    #[tokio::test]
    async fn error_reply_is_refused() {
        let ep = fake_index("idx", |_| Message::error("no such file")).await;
        match client(ep).lookup("a", "b").await {
            Err(IndexError::Refused(text)) => assert_eq!(text, "no such file"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_index_secret_fails_handshake() {
        let mut ep = fake_index("idx", |_| Message::Goodbye).await;
        ep.secret = "wrong".into();
        assert!(matches!(
            client(ep).lookup("a", "b").await,
            Err(IndexError::Handshake(HandshakeError::Rejected))
        ));
    }

    #[tokio::test]
    async fn share_search_drop() {
        let ep = fake_index("idx", |req| match req {
            Message::ShareRequest { .. } => Message::ShareReply { num_sharers: 3 },
            Message::SearchRequest { .. } => Message::SearchReply {
                hits: vec![Source {
                    ip: "10.0.0.1".into(),
                    port: 1,
                    filename: "x".into(),
                    file_descriptor: FileDescriptor::from_bytes(b"x", 1),
                    secret: "s".into(),
                }],
                seed_counts: vec![4],
            },
            Message::DropShareRequest { .. } => Message::DropShareReply { success: true },
            _ => Message::error("bad"),
        })
        .await;
        let c = client(ep);
        let d = FileDescriptor::from_bytes(b"x", 1);
        assert_eq!(c.share(&d, "x", "s", 7).await.unwrap(), 3);
        let hits = c.search(&["x".to_string()], 10).await.unwrap();
        assert_eq!(hits[0].seed_count, 4);
        assert!(c.drop_share("x", &d.file_hash, "s", 7).await.unwrap());
    }
}
