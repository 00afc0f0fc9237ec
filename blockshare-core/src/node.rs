//! Peer node: owns the share registry and the upload server, and is the entry point for
//! sharing, searching, dropping and downloading files.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::descriptor::FileDescriptor;
use crate::download::{self, DownloadError, DownloadReport, DownloadSession, DownloadState, Downloader};
use crate::index::{IndexClient, IndexEndpoint, IndexError, SearchHit};
use crate::shares::{ShareEntry, ShareRegistry};
use crate::store::{BlockStore, FileBlockStore, StoreError};
use crate::upload::{UploadServer, DEFAULT_WELCOME};

/// Everything needed to start a node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub listen: SocketAddr,
    /// Shared files are named relative to this directory.
    pub basedir: PathBuf,
    pub download_dir: PathBuf,
    pub welcome: String,
    pub transfer: Config,
}

impl NodeOptions {
    pub fn new(listen: SocketAddr, basedir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen,
            basedir: basedir.into(),
            download_dir: download_dir.into(),
            welcome: DEFAULT_WELCOME.to_string(),
            transfer: Config::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("upload server: {0}")]
    Io(#[from] io::Error),
    #[error("invalid relative path {0:?}")]
    InvalidPath(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("{0} is not shared")]
    NotShared(String),
    #[error("background task failed")]
    TaskFailed,
}

pub struct PeerNode {
    config: Config,
    basedir: PathBuf,
    download_dir: PathBuf,
    shares: Arc<ShareRegistry>,
    local_addr: SocketAddr,
    server_shutdown: CancellationToken,
    server: JoinHandle<io::Result<()>>,
    downloads: CancellationToken,
}

impl PeerNode {
    /// Bind the upload server and start accepting peers.
    pub async fn start(options: NodeOptions) -> Result<Self, NodeError> {
        let config = options.transfer.normalized();
        let shares = Arc::new(ShareRegistry::new());
        let server = UploadServer::bind(options.listen, shares.clone(), config.clone())
            .await?
            .with_welcome(options.welcome);
        let local_addr = server.local_addr()?;
        let server_shutdown = server.shutdown_token();
        let server = tokio::spawn(server.run());
        tracing::info!(%local_addr, basedir = %options.basedir.display(), "peer node started");
        Ok(Self {
            config,
            basedir: options.basedir,
            download_dir: options.download_dir,
            shares,
            local_addr,
            server_shutdown,
            server,
            downloads: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shares(&self) -> &Arc<ShareRegistry> {
        &self.shares
    }

    fn index_client(&self, index: &IndexEndpoint) -> IndexClient {
        IndexClient::new(index.clone(), &self.config)
    }

    /// Describe `relative_path` (under the base directory), advertise it to `index` and
    /// start serving it.
    pub async fn share_file(
        &self,
        relative_path: &str,
        index: &IndexEndpoint,
        secret: &str,
    ) -> Result<ShareEntry, NodeError> {
        let path = download::local_path(&self.basedir, relative_path)
            .map_err(|_| NodeError::InvalidPath(relative_path.to_string()))?;
        let block_size = self.config.block_size;
        let store = tokio::task::spawn_blocking(move || FileBlockStore::open_existing(path, block_size))
            .await
            .map_err(|_| NodeError::TaskFailed)??;
        let store = Arc::new(store);
        let num_sharers = self
            .index_client(index)
            .share(store.descriptor(), relative_path, secret, self.local_addr.port())
            .await?;
        let entry = ShareEntry {
            relative_path: relative_path.to_string(),
            secret: secret.to_string(),
            store: store.clone(),
            index: Some(index.clone()),
            num_sharers,
        };
        if self.shares.insert(entry.clone()).await.is_some() {
            tracing::debug!(file = %relative_path, "replaced existing share");
        }
        tracing::info!(
            file = %relative_path,
            path = %store.path().display(),
            %index,
            num_sharers,
            "sharing file"
        );
        Ok(entry)
    }

    pub async fn search(
        &self,
        index: &IndexEndpoint,
        keywords: &[String],
        max_hits: u32,
    ) -> Result<Vec<SearchHit>, NodeError> {
        let hits = self.index_client(index).search(keywords, max_hits).await?;
        tracing::debug!(%index, hits = hits.len(), "search finished");
        Ok(hits)
    }

    /// Withdraw a share from its index server and stop serving it. The share stays active
    /// when the index refuses the drop.
    pub async fn drop_share(&self, relative_path: &str) -> Result<bool, NodeError> {
        let entry = self
            .shares
            .get(relative_path)
            .await
            .ok_or_else(|| NodeError::NotShared(relative_path.to_string()))?;
        let dropped = match &entry.index {
            Some(index) => {
                self.index_client(index)
                    .drop_share(
                        relative_path,
                        &entry.store.descriptor().file_hash,
                        &entry.secret,
                        self.local_addr.port(),
                    )
                    .await?
            }
            None => true,
        };
        if dropped {
            self.shares.remove(relative_path).await;
            tracing::info!(file = %relative_path, "share dropped");
        } else {
            tracing::warn!(file = %relative_path, "index refused to drop share");
        }
        Ok(dropped)
    }

    /// Start downloading `relative_path` into the download directory, asking `index` for sources.
    pub fn download(
        &self,
        relative_path: &str,
        descriptor: FileDescriptor,
        index: &IndexEndpoint,
    ) -> DownloadHandle {
        let downloader = Downloader::new(Arc::new(self.index_client(index)), self.config.clone());
        let mut session = DownloadSession::new(relative_path, descriptor);
        let id = session.id();
        let state = session.subscribe();
        let cancel = self.downloads.child_token();
        let token = cancel.clone();
        let dir = self.download_dir.clone();
        let task = tokio::spawn(async move { downloader.run(&mut session, &dir, &token).await });
        DownloadHandle {
            id,
            state,
            cancel,
            task,
        }
    }

    /// Stop the upload server and cancel running downloads.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        self.downloads.cancel();
        self.server_shutdown.cancel();
        let served = self.server.await.map_err(|_| NodeError::TaskFailed)?;
        tracing::info!(addr = %self.local_addr, "peer node stopped");
        served.map_err(NodeError::from)
    }
}

/// A running download.
pub struct DownloadHandle {
    id: Uuid,
    state: watch::Receiver<DownloadState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<DownloadReport, DownloadError>>,
}

impl DownloadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<DownloadReport, NodeError> {
        Ok(self.task.await.map_err(|_| NodeError::TaskFailed)??)
    }
}
