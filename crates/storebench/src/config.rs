//! Configuration types for the benchmark harness.

use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// One kibibyte.
pub const KIB: usize = 1024;
/// One mebibyte.
pub const MIB: usize = 1024 * KIB;

/// Storage backend under test.
///
/// Variant order is the order backends run in and the row order of the
/// results table. Serializes as [`Backend::id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    /// Origin-private file system through the async writable-stream API.
    Opfs,
    /// HTTP-response cache.
    CacheApi,
    /// Document key-value store (IndexedDB-style object stores).
    IndexedDb,
    /// Origin-private file system through sync access handles, worker only.
    OpfsSync,
}

impl Backend {
    /// Get the display name for this backend.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opfs => "OPFS",
            Self::CacheApi => "Cache API",
            Self::IndexedDb => "IndexedDB",
            Self::OpfsSync => "OPFS Sync",
        }
    }

    /// Get the fixed identifier used in reports.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Opfs => "opfs",
            Self::CacheApi => "cacheApi",
            Self::IndexedDb => "indexedDB",
            Self::OpfsSync => "opfsSync",
        }
    }

    /// Get all backends.
    pub fn all() -> [Self; 4] {
        [Self::Opfs, Self::CacheApi, Self::IndexedDb, Self::OpfsSync]
    }
}

impl Serialize for Backend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Shape of a workload: one large blob or many small ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkloadShape {
    SingleFile,
    MultipleFiles,
}

impl WorkloadShape {
    pub fn all() -> [Self; 2] {
        [Self::SingleFile, Self::MultipleFiles]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleFile => "single file",
            Self::MultipleFiles => "multiple files",
        }
    }
}

impl std::fmt::Display for WorkloadShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Measured operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Write,
    Read,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Configuration for a benchmark session.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Origin-private data root shared by all backends.
    pub root: PathBuf,
    /// Size of the single-file workload in bytes.
    pub single_file_bytes: usize,
    /// Number of items in the multiple-files workload.
    pub file_count: usize,
    /// Size of each item in the multiple-files workload in bytes.
    pub file_bytes: usize,
    /// Maximum time for a single backend operation on the main context.
    pub op_timeout: Duration,
    /// Maximum time to wait for the worker context to report back.
    pub worker_timeout: Duration,
    /// Compare materialized bytes against the workload after every read.
    pub verify: bool,
    /// Whether sync access handles are available on this platform.
    pub sync_access_handles: bool,
    /// Enable colored output.
    pub color: bool,
}

impl BenchmarkConfig {
    /// Create a configuration rooted at `root` with the standard workloads.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            single_file_bytes: 100 * MIB,
            file_count: 100,
            file_bytes: KIB,
            op_timeout: Timeouts::OPERATION,
            worker_timeout: Timeouts::WORKER_REPLY,
            verify: true,
            sync_access_handles: true,
            color: true,
        }
    }

    /// Default data root under the user's cache directory.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("storebench")
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

/// Timeout durations for various operations.
pub struct Timeouts;

impl Timeouts {
    /// Maximum time for one write or read of one backend.
    pub const OPERATION: Duration = Duration::from_secs(120);
    /// Maximum time to wait for all worker replies of a run.
    pub const WORKER_REPLY: Duration = Duration::from_secs(300);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_serialize_as_their_ids() {
        for backend in Backend::all() {
            let value = serde_json::to_value(backend).unwrap();
            assert_eq!(value, backend.id());
        }
        assert_eq!(Backend::IndexedDb.id(), "indexedDB");
    }
}
