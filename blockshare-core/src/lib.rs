//! Blockshare peer node.
//! Block-verified file transfer between peers, coordinated through an index server.

pub mod channel;
pub mod config;
pub mod descriptor;
pub mod download;
pub mod handshake;
pub mod index;
pub mod integrity;
pub mod node;
pub mod pipeline;
pub mod protocol;
pub mod shares;
pub mod store;
pub mod upload;
pub mod wire;

pub use channel::{Channel, ChannelError};
pub use config::Config;
pub use descriptor::{FileDescriptor, DEFAULT_BLOCK_SIZE};
pub use download::{DownloadError, DownloadReport, DownloadSession, DownloadState, Downloader};
pub use index::{IndexClient, IndexEndpoint, IndexError, SearchHit, SourceProvider};
pub use node::{DownloadHandle, NodeError, NodeOptions, PeerNode};
pub use protocol::{Message, Source};
pub use store::{BlockStore, FileBlockStore, StoreError};
pub use upload::UploadServer;
