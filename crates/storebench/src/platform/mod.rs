//! Storage services reachable through the platform capability boundary.
//!
//! A [`Platform`] plays the role of the host's storage globals: it hands out
//! the origin-private file system ([`StorageManager`]), the response cache
//! ([`CacheStorage`]) and the document store ([`IdbFactory`]). All three live
//! under one origin-private data root and are thin shims over real engines
//! (the local filesystem and SQLite).
//!
//! Sync access handles are gated twice: the platform must support them and
//! the caller must be running on the isolated worker context.

mod cache;
mod idb;
mod opfs;

pub use cache::{Cache, CacheStorage, CachedResponse, Response};
pub use idb::{Database, IdbFactory, VersionChange};
pub use opfs::{
    DirectoryHandle, FileBlob, FileHandle, StorageManager, SyncAccessHandle, WritableFileStream,
};

use crate::config::BenchmarkConfig;
use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

thread_local! {
    static WORKER_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as the isolated worker context.
pub(crate) fn enter_worker_context() {
    WORKER_CONTEXT.with(|flag| flag.set(true));
}

/// Whether the current thread is the isolated worker context.
pub fn in_worker_context() -> bool {
    WORKER_CONTEXT.with(Cell::get)
}

/// Capability boundary for the storage services.
#[derive(Debug, Clone)]
pub struct Platform {
    root: PathBuf,
    sync_access_handles: bool,
    open_latency: Duration,
}

impl Platform {
    /// Create a platform whose origin-private data lives under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_access_handles: true,
            open_latency: Duration::ZERO,
        }
    }

    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Self::new(config.root.clone()).with_sync_access_handles(config.sync_access_handles)
    }

    /// Enable or disable the sync access handle capability.
    #[must_use]
    pub fn with_sync_access_handles(mut self, enabled: bool) -> Self {
        self.sync_access_handles = enabled;
        self
    }

    /// Add a fixed delay to every root-handle, cache-open and database-open
    /// call, modelling slow handle acquisition.
    #[must_use]
    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn supports_sync_access_handles(&self) -> bool {
        self.sync_access_handles
    }

    /// Origin-private file system.
    pub fn storage(&self) -> StorageManager {
        StorageManager::new(self.clone())
    }

    /// Response cache storage.
    pub fn caches(&self) -> CacheStorage {
        CacheStorage::new(self.clone())
    }

    /// Document store factory.
    pub fn indexed_db(&self) -> IdbFactory {
        IdbFactory::new(self.clone())
    }

    pub(crate) fn opfs_root(&self) -> PathBuf {
        self.root.join("opfs")
    }

    pub(crate) fn caches_root(&self) -> PathBuf {
        self.root.join("caches")
    }

    pub(crate) fn idb_root(&self) -> PathBuf {
        self.root.join("idb")
    }

    pub(crate) async fn open_delay(&self) {
        if !self.open_latency.is_zero() {
            tokio::time::sleep(self.open_latency).await;
        }
    }

    pub(crate) fn open_delay_blocking(&self) {
        if !self.open_latency.is_zero() {
            std::thread::sleep(self.open_latency);
        }
    }
}

/// Reject names that would escape their parent directory.
pub(crate) fn validate_name(kind: &str, name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {kind} name: {name:?}"),
        ));
    }
    Ok(())
}
