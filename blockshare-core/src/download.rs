//! Multi-source download orchestrator.
//!
//! A download pulls every missing block of one file from the sources the index reports.
//! Each pass walks a shuffled worklist across the source list, one connection per source,
//! at most `max_blocks_per_connection` blocks per connection before rotating to the next
//! source. Received blocks go through the write pipeline; after each pass the missing set is
//! recomputed from the block store. When the source list is used up and the pass fetched
//! something, the same sources are walked again; a pass that fetched nothing queries the
//! index again, up to `max_retries` times.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::Config;
use crate::descriptor::FileDescriptor;
use crate::handshake;
use crate::index::SourceProvider;
use crate::integrity;
use crate::pipeline::{BlockWritePipeline, PipelineError};
use crate::protocol::{Message, Source};
use crate::store::{missing_blocks, BlockStore, FileBlockStore, StoreError};

/// Where a download session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    AcquiringSources,
    Connecting,
    Transferring,
    Verifying,
    Done,
    Failed,
}

/// What a finished download did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Blocks received with a valid hash and queued for writing.
    pub blocks_fetched: usize,
    /// Blocks received with a wrong hash.
    pub blocks_rejected: usize,
    /// Authenticated peer connections opened.
    pub connections: usize,
    pub lookups: u32,
    /// Index re-query rounds used.
    pub retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid relative path {0:?}")]
    InvalidPath(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("{missing} blocks still missing after {retries} retries")]
    Exhausted { missing: usize, retries: u32 },
    #[error("download cancelled")]
    Cancelled,
    #[error("blocking storage task failed")]
    TaskFailed,
}

/// Progress of one download request.
pub struct DownloadSession {
    id: Uuid,
    relative_path: String,
    descriptor: FileDescriptor,
    state: watch::Sender<DownloadState>,
    sources: Vec<Source>,
    cursor: usize,
    retries: u32,
    missing: Vec<usize>,
    report: DownloadReport,
}

impl DownloadSession {
    pub fn new(relative_path: impl Into<String>, descriptor: FileDescriptor) -> Self {
        let (state, _) = watch::channel(DownloadState::AcquiringSources);
        Self {
            id: Uuid::new_v4(),
            relative_path: relative_path.into(),
            descriptor,
            state,
            sources: Vec::new(),
            cursor: 0,
            retries: 0,
            missing: Vec::new(),
            report: DownloadReport::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    /// Receiver that sees every state transition.
    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    /// Block indices missing after the last verification.
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }

    pub fn report(&self) -> DownloadReport {
        self.report
    }

    fn transition(&self, next: DownloadState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(session = %self.id, file = %self.relative_path, from = ?prev, to = ?next, "download state");
        }
    }
}

/// Resolve `relative_path` under `download_dir`. Absolute paths and `..` are refused.
pub fn local_path(download_dir: &Path, relative_path: &str) -> Result<PathBuf, DownloadError> {
    let rel = Path::new(relative_path);
    let valid = !relative_path.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && rel.components().any(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(DownloadError::InvalidPath(relative_path.to_string()));
    }
    Ok(download_dir.join(rel))
}

/// Runs download sessions against one source provider.
#[derive(Clone)]
pub struct Downloader {
    provider: Arc<dyn SourceProvider>,
    config: Config,
}

impl Downloader {
    pub fn new(provider: Arc<dyn SourceProvider>, config: Config) -> Self {
        Self {
            provider,
            config: config.normalized(),
        }
    }

    /// Download `relative_path` into `download_dir`.
    pub async fn download(
        &self,
        relative_path: &str,
        descriptor: FileDescriptor,
        download_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let mut session = DownloadSession::new(relative_path, descriptor);
        self.run(&mut session, download_dir, cancel).await
    }

    /// Drive `session` to `Done` or `Failed`.
    pub async fn run(
        &self,
        session: &mut DownloadSession,
        download_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let result = self.run_session(session, download_dir, cancel).await;
        match &result {
            Ok(report) => {
                session.transition(DownloadState::Done);
                tracing::info!(
                    session = %session.id,
                    file = %session.relative_path,
                    fetched = report.blocks_fetched,
                    rejected = report.blocks_rejected,
                    connections = report.connections,
                    retries = report.retries,
                    "download complete"
                );
            }
            Err(e) => {
                session.transition(DownloadState::Failed);
                tracing::warn!(session = %session.id, file = %session.relative_path, error = %e, "download failed");
            }
        }
        result
    }

    async fn run_session(
        &self,
        session: &mut DownloadSession,
        download_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let path = local_path(download_dir, &session.relative_path)?;
        let descriptor = session.descriptor.clone();
        let store: Arc<dyn BlockStore> =
            Arc::new(blocking(move || FileBlockStore::open(path, descriptor)).await?);

        session.missing = missing_blocks(store.as_ref());
        if session.missing.is_empty() {
            tracing::info!(session = %session.id, file = %session.relative_path, "already complete");
            let closing = store.clone();
            blocking(move || closing.close()).await?;
            return Ok(session.report);
        }
        tracing::info!(
            session = %session.id,
            file = %session.relative_path,
            missing = session.missing.len(),
            blocks = store.num_blocks(),
            "download started"
        );

        let pipeline = BlockWritePipeline::start(store.clone(), self.config.write_backlog);
        let outcome = self
            .transfer(session, store.as_ref(), &pipeline, cancel)
            .await;
        let stopped = pipeline.stop().await;
        let closing = store.clone();
        let closed = blocking(move || closing.close()).await;

        let stats = stopped?;
        tracing::debug!(session = %session.id, written = stats.written, rejected = stats.rejected, "writer finished");
        outcome?;
        closed?;
        Ok(session.report)
    }

    async fn transfer(
        &self,
        session: &mut DownloadSession,
        store: &dyn BlockStore,
        pipeline: &BlockWritePipeline,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        self.acquire_sources(session, cancel).await?;
        let mut fetched_at_round_start = session.report.blocks_fetched;
        loop {
            let mut worklist = session.missing.clone();
            worklist.shuffle(&mut rand::thread_rng());

            while !worklist.is_empty() && session.cursor < session.sources.len() {
                if cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                let source = session.sources[session.cursor].clone();
                // every connection uses up its source for this round
                session.cursor += 1;
                session.transition(DownloadState::Connecting);
                let connected = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    r = handshake::connect(
                        &source.ip,
                        source.port,
                        &source.secret,
                        self.config.connect_timeout(),
                        self.config.read_timeout(),
                    ) => r,
                };
                let mut channel = match connected {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(session = %session.id, peer = %source.endpoint(), error = %e, "source unreachable");
                        continue;
                    }
                };
                session.report.connections += 1;
                session.transition(DownloadState::Transferring);

                let end = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    end = fetch_blocks(
                        &mut channel,
                        &source,
                        &session.descriptor,
                        &mut worklist,
                        pipeline,
                        self.config.max_blocks_per_connection,
                        &mut session.report,
                    ) => Some(end),
                };
                channel.goodbye().await;
                match end {
                    None => return Err(DownloadError::Cancelled),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(ConnectionEnd::Dropped(reason))) => {
                        tracing::warn!(session = %session.id, peer = %source.endpoint(), reason = %reason, "connection abandoned");
                    }
                    Some(Ok(end)) => {
                        tracing::debug!(session = %session.id, peer = %source.endpoint(), ?end, "connection finished");
                    }
                }
            }

            session.transition(DownloadState::Verifying);
            pipeline.flush().await?;
            session.missing = missing_blocks(store);
            if session.missing.is_empty() {
                return Ok(());
            }
            if session.cursor >= session.sources.len() {
                if session.report.blocks_fetched > fetched_at_round_start {
                    // the round made progress, so go around the same sources again
                    tracing::debug!(
                        session = %session.id,
                        missing = session.missing.len(),
                        sources = session.sources.len(),
                        "reusing sources"
                    );
                    fetched_at_round_start = session.report.blocks_fetched;
                    session.cursor = 0;
                    continue;
                }
                session.retries += 1;
                session.report.retries = session.retries;
                if session.retries > self.config.max_retries {
                    return Err(DownloadError::Exhausted {
                        missing: session.missing.len(),
                        retries: self.config.max_retries,
                    });
                }
                tracing::info!(
                    session = %session.id,
                    missing = session.missing.len(),
                    retry = session.retries,
                    "sources exhausted, asking index again"
                );
                self.acquire_sources(session, cancel).await?;
                fetched_at_round_start = session.report.blocks_fetched;
            }
        }
    }

    async fn acquire_sources(
        &self,
        session: &mut DownloadSession,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        session.transition(DownloadState::AcquiringSources);
        session.report.lookups += 1;
        let looked_up = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            r = self.provider.lookup(&session.relative_path, &session.descriptor.file_hash) => r,
        };
        let sources = match looked_up {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "lookup failed");
                Vec::new()
            }
        };
        let total = sources.len();
        session.sources = sources
            .into_iter()
            .filter(|s| s.file_descriptor.file_hash == session.descriptor.file_hash)
            .collect();
        if session.sources.len() != total {
            tracing::warn!(
                session = %session.id,
                ignored = total - session.sources.len(),
                "ignoring sources with a different file hash"
            );
        }
        session.cursor = 0;
        tracing::debug!(session = %session.id, sources = session.sources.len(), "sources acquired");
        Ok(())
    }
}

#[derive(Debug)]
enum ConnectionEnd {
    CapReached,
    Drained,
    Dropped(String),
}

/// Fetch blocks from one connection. Blocks that could not be fetched go back on the worklist.
async fn fetch_blocks(
    channel: &mut Channel,
    source: &Source,
    descriptor: &FileDescriptor,
    worklist: &mut Vec<usize>,
    pipeline: &BlockWritePipeline,
    cap: usize,
    report: &mut DownloadReport,
) -> Result<ConnectionEnd, PipelineError> {
    let mut fetched = 0;
    while fetched < cap {
        let Some(index) = worklist.pop() else {
            return Ok(ConnectionEnd::Drained);
        };
        let Some(block_hash) = descriptor.block_hash(index) else {
            continue;
        };
        let request = Message::BlockRequest {
            filename: source.filename.clone(),
            block_hash: block_hash.to_string(),
            block_index: index,
        };
        let reply = match channel.send(&request).await {
            Ok(()) => channel.receive().await,
            Err(e) => Err(e),
        };
        let failure = match reply {
            Ok(Message::BlockReply {
                block_index, data, ..
            }) if block_index == index => {
                fetched += 1;
                if integrity::verify_block(&data, block_hash) {
                    pipeline.enqueue(index, data).await?;
                    report.blocks_fetched += 1;
                } else {
                    tracing::warn!(peer = %source.endpoint(), block = index, "block failed hash check");
                    report.blocks_rejected += 1;
                }
                continue;
            }
            Ok(Message::BlockReply { block_index, .. }) => {
                format!("got block {} instead of {}", block_index, index)
            }
            Ok(Message::ErrorMsg { text }) => text,
            Ok(other) => format!("unexpected {}", other.kind()),
            Err(e) => e.to_string(),
        };
        worklist.push(index);
        return Ok(ConnectionEnd::Dropped(failure));
    }
    Ok(ConnectionEnd::CapReached)
}

async fn blocking<T, F>(f: F) -> Result<T, DownloadError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| DownloadError::TaskFailed)?
        .map_err(DownloadError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const SECRET: &str = "pw";
    const NAME: &str = "movie.bin";

    #[derive(Clone, Copy)]
    enum Behaviour {
        Honest,
        /// Flip a byte in every block served.
        Corrupt,
        /// Close the first connection after serving this many blocks.
        DropAfter(usize),
    }

    struct FakePeer {
        port: u16,
        served: Arc<Mutex<Vec<usize>>>,
    }

    impl FakePeer {
        fn served(&self) -> Vec<usize> {
            self.served.lock().unwrap().clone()
        }

        fn source(&self, descriptor: &FileDescriptor) -> Source {
            Source {
                ip: "127.0.0.1".into(),
                port: self.port,
                filename: NAME.into(),
                file_descriptor: descriptor.clone(),
                secret: SECRET.into(),
            }
        }
    }

    async fn fake_peer(data: Arc<Vec<u8>>, descriptor: FileDescriptor, behaviour: Behaviour) -> FakePeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let served = Arc::new(Mutex::new(Vec::new()));
        let log = served.clone();
        tokio::spawn(async move {
            let mut conn_no = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let (data, descriptor, log) = (data.clone(), descriptor.clone(), log.clone());
                let first = conn_no == 0;
                conn_no += 1;
                tokio::spawn(async move {
                    let mut ch = Channel::from_tcp(stream, Duration::from_secs(2));
                    if handshake::accept(&mut ch, "fake", |s| async move { s == SECRET })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let mut in_conn = 0usize;
                    while let Ok(msg) = ch.receive().await {
                        match msg {
                            Message::BlockRequest { block_index, .. } => {
                                if let Behaviour::DropAfter(n) = behaviour {
                                    if first && in_conn == n {
                                        return;
                                    }
                                }
                                let r = descriptor.block_range(block_index).unwrap();
                                let mut bytes = data[r.start as usize..r.end as usize].to_vec();
                                if let Behaviour::Corrupt = behaviour {
                                    bytes[0] ^= 0xff;
                                }
                                in_conn += 1;
                                log.lock().unwrap().push(block_index);
                                let reply = Message::BlockReply {
                                    filename: NAME.into(),
                                    file_hash: descriptor.file_hash.clone(),
                                    block_index,
                                    data: bytes,
                                };
                                if ch.send(&reply).await.is_err() {
                                    return;
                                }
                            }
                            _ => {
                                let _ = ch.send(&Message::Goodbye).await;
                                return;
                            }
                        }
                    }
                });
            }
        });
        FakePeer { port, served }
    }

    /// Answers the n-th lookup with `rounds[n]` (the last entry repeats).
    struct ScriptedIndex {
        rounds: Vec<Vec<Source>>,
        lookups: AtomicUsize,
    }

    impl ScriptedIndex {
        fn new(rounds: Vec<Vec<Source>>) -> Arc<Self> {
            Arc::new(Self {
                rounds,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl SourceProvider for ScriptedIndex {
        async fn lookup(&self, _filename: &str, _file_hash: &str) -> Result<Vec<Source>, IndexError> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rounds
                .get(n)
                .or(self.rounds.last())
                .cloned()
                .unwrap_or_default())
        }
    }

    fn test_config() -> Config {
        Config {
            connect_timeout_ms: 1_000,
            read_timeout_ms: 1_000,
            max_blocks_per_connection: 3,
            ..Config::default()
        }
    }

    fn sample(len: usize, block_size: u32) -> (Arc<Vec<u8>>, FileDescriptor) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 253) as u8).collect();
        let d = FileDescriptor::from_bytes(&data, block_size);
        (Arc::new(data), d)
    }

    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn downloads_from_two_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (data, d) = sample(10 * 256 + 17, 256);
        let a = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let b = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let index = ScriptedIndex::new(vec![vec![a.source(&d), b.source(&d)]]);
        let downloader = Downloader::new(index.clone(), test_config());

        let report = downloader
            .download(NAME, d.clone(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join(NAME)).unwrap(), *data);
        assert_eq!(report.blocks_fetched, d.num_blocks());
        assert_eq!(report.blocks_rejected, 0);
        assert_eq!(a.served().len() + b.served().len(), d.num_blocks());
        assert!(!b.served().is_empty());
    }

    #[tokio::test]
    async fn complete_file_needs_no_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (data, d) = sample(2000, 256);
        let peer = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let index = ScriptedIndex::new(vec![vec![peer.source(&d)]]);
        let downloader = Downloader::new(index.clone(), test_config());
        let cancel = CancellationToken::new();

        downloader.download(NAME, d.clone(), dir.path(), &cancel).await.unwrap();
        let lookups = index.lookups.load(Ordering::SeqCst);
        let served = peer.served().len();

        let report = downloader.download(NAME, d, dir.path(), &cancel).await.unwrap();
        assert_eq!(report, DownloadReport::default());
        assert_eq!(index.lookups.load(Ordering::SeqCst), lookups);
        assert_eq!(peer.served().len(), served);
    }

    #[tokio::test]
    async fn corrupt_blocks_come_from_another_source() {
        let dir = tempfile::tempdir().unwrap();
        let (data, d) = sample(6 * 128, 128);
        let bad = fake_peer(data.clone(), d.clone(), Behaviour::Corrupt).await;
        let good = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let index = ScriptedIndex::new(vec![vec![bad.source(&d), good.source(&d)]]);
        let downloader = Downloader::new(index, test_config());

        let report = downloader
            .download(NAME, d.clone(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join(NAME)).unwrap(), *data);
        assert_eq!(report.blocks_rejected, bad.served().len());
        assert!(report.blocks_rejected > 0);
        assert_eq!(good.served().len(), d.num_blocks());
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (_, d) = sample(1000, 256);
        let unreachable = Source {
            ip: "127.0.0.1".into(),
            port: dead_port().await,
            filename: NAME.into(),
            file_descriptor: d.clone(),
            secret: SECRET.into(),
        };
        let index = ScriptedIndex::new(vec![vec![unreachable]]);
        let config = Config {
            max_retries: 2,
            ..test_config()
        };
        let downloader = Downloader::new(index.clone(), config);
        let mut session = DownloadSession::new(NAME, d.clone());
        let err = downloader
            .run(&mut session, dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Exhausted {
                missing: 4,
                retries: 2
            }
        ));
        assert_eq!(index.lookups.load(Ordering::SeqCst), 3);
        assert_eq!(session.state(), DownloadState::Failed);
        assert_eq!(session.report().lookups, 3);
    }

    #[tokio::test]
    async fn requery_finds_new_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (data, d) = sample(1000, 256);
        let peer = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let index = ScriptedIndex::new(vec![vec![], vec![peer.source(&d)]]);
        let config = Config {
            max_blocks_per_connection: 32,
            ..test_config()
        };
        let downloader = Downloader::new(index.clone(), config);
        let report = downloader
            .download(NAME, d, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.lookups, 2);
        assert_eq!(report.retries, 1);
        assert_eq!(std::fs::read(dir.path().join(NAME)).unwrap(), *data);
    }

    #[tokio::test]
    async fn resumes_after_peer_drops_mid_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (data, d) = sample(4 * 64, 64);
        let peer = fake_peer(data.clone(), d.clone(), Behaviour::DropAfter(2)).await;
        let index = ScriptedIndex::new(vec![vec![peer.source(&d)]]);
        let config = Config {
            max_blocks_per_connection: 32,
            ..test_config()
        };
        let downloader = Downloader::new(index, config);
        downloader
            .download(NAME, d.clone(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join(NAME)).unwrap(), *data);
        let mut served = peer.served();
        assert_eq!(served.len(), 4);
        served.sort_unstable();
        assert_eq!(served, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn single_source_rounds_past_cap_without_spending_retries() {
        let dir = tempfile::tempdir().unwrap();
        // (max_retries + 1) * cap is 6, so this needs more rounds than the budget allows
        let (data, d) = sample(10 * 64, 64);
        let peer = fake_peer(data.clone(), d.clone(), Behaviour::Honest).await;
        let index = ScriptedIndex::new(vec![vec![peer.source(&d)]]);
        let config = Config {
            max_retries: 1,
            ..test_config()
        };
        let downloader = Downloader::new(index.clone(), config);
        let report = downloader
            .download(NAME, d.clone(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join(NAME)).unwrap(), *data);
        assert_eq!(report.lookups, 1);
        assert_eq!(report.retries, 0);
        assert_eq!(report.connections, 4);
        assert_eq!(index.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(peer.served().len(), d.num_blocks());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let (_, d) = sample(1000, 256);
        let index = ScriptedIndex::new(vec![vec![]]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Downloader::new(index, test_config())
            .download(NAME, d, dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
    }

    #[test]
    fn rejects_escaping_paths() {
        let base = Path::new("/downloads");
        assert!(local_path(base, "a/b.txt").is_ok());
        assert!(matches!(
            local_path(base, "../etc/passwd"),
            Err(DownloadError::InvalidPath(_))
        ));
        assert!(local_path(base, "/etc/passwd").is_err());
        assert!(local_path(base, "a/../../b").is_err());
        assert!(local_path(base, "").is_err());
        assert!(local_path(base, ".").is_err());
    }
}
