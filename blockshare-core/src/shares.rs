//! Share registry: the files this node currently serves, keyed by relative path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::index::IndexEndpoint;
use crate::store::BlockStore;

/// One locally shared file.
#[derive(Clone)]
pub struct ShareEntry {
    pub relative_path: String,
    pub secret: String,
    pub store: Arc<dyn BlockStore>,
    /// Index server the file was advertised to, if any.
    pub index: Option<IndexEndpoint>,
    /// Sharer count reported by the index server at share time.
    pub num_sharers: u32,
}

impl std::fmt::Debug for ShareEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareEntry")
            .field("relative_path", &self.relative_path)
            .field("file_hash", &self.store.descriptor().file_hash)
            .field("num_sharers", &self.num_sharers)
            .finish()
    }
}

/// Concurrent map of active shares. Upload workers read it; share/drop operations write it.
#[derive(Default)]
pub struct ShareRegistry {
    entries: RwLock<HashMap<String, ShareEntry>>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a share. Returns the entry it replaced.
    pub async fn insert(&self, entry: ShareEntry) -> Option<ShareEntry> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.relative_path.clone(), entry)
    }

    pub async fn remove(&self, relative_path: &str) -> Option<ShareEntry> {
        self.entries.write().await.remove(relative_path)
    }

    pub async fn get(&self, relative_path: &str) -> Option<ShareEntry> {
        self.entries.read().await.get(relative_path).cloned()
    }

    /// Whether any active share uses `secret`; gates the upload handshake.
    pub async fn has_secret(&self, secret: &str) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| e.secret == secret)
    }

    pub async fn list(&self) -> Vec<ShareEntry> {
        let mut out: Vec<ShareEntry> = self.entries.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
