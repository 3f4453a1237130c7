//! Backend adapters and the timing harness.

mod cache;
mod indexed_db;
mod opfs;
mod opfs_sync;
mod timing;

pub use cache::CacheBackend;
pub use indexed_db::IndexedDbBackend;
pub use opfs::OpfsBackend;
pub use opfs_sync::OpfsSyncBackend;
pub use timing::{OpTiming, Stopwatch, as_millis_f64, mean, mean_ms};

use crate::config::{Backend, BenchmarkConfig};
use crate::error::{BenchError, Result};
use crate::platform::Platform;
use crate::workload::Workload;
use futures::future::BoxFuture;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Uniform contract of the main-context backends.
///
/// `write` persists every item of the workload under its key; `read`
/// retrieves and fully materializes every item. Both return one timed sample
/// per item; the sync-handle backend offers the same pair as blocking calls
/// on [`OpfsSyncBackend`].
pub trait StorageBackend: Send + Sync {
    /// Which backend this is.
    fn id(&self) -> Backend;

    /// Persist the workload.
    fn write<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>>;

    /// Read the workload back by key.
    fn read<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>>;
}

/// Settings shared by every adapter.
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    /// Deadline for each timed transfer.
    pub op_timeout: Duration,
    /// Compare read bytes with the workload after each read.
    pub verify: bool,
}

impl BackendOptions {
    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Self {
            op_timeout: config.op_timeout,
            verify: config.verify,
        }
    }
}

/// The main-context backends in run order.
pub fn main_context_backends(
    platform: &Platform,
    options: BackendOptions,
) -> Vec<Box<dyn StorageBackend>> {
    vec![
        Box::new(OpfsBackend::new(platform, options)),
        Box::new(CacheBackend::new(platform, options)),
        Box::new(IndexedDbBackend::new(platform, options)),
    ]
}

/// Run a storage-layer transfer for `key`, classifying its I/O error.
pub(crate) async fn transfer<T>(
    backend: Backend,
    key: &str,
    op: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    op.await.map_err(|e| BenchError::from_io(backend, key, &e))
}

/// Compare materialized bytes with what was written.
pub(crate) fn verify_read(
    backend: Backend,
    key: &str,
    expected: &[u8],
    actual: &[u8],
) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    let reason = if expected.len() == actual.len() {
        let offset = expected
            .iter()
            .zip(actual)
            .position(|(a, b)| a != b)
            .unwrap_or_default();
        format!("content differs at offset {offset}")
    } else {
        format!("read {} bytes, expected {}", actual.len(), expected.len())
    };
    Err(BenchError::TransferFailure {
        backend,
        key: key.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_read_accepts_identical_bytes() {
        assert!(verify_read(Backend::Opfs, "k", b"abc", b"abc").is_ok());
    }

    #[test]
    fn verify_read_reports_offset_and_length() {
        let err = verify_read(Backend::Opfs, "k", b"abc", b"abd").unwrap_err();
        assert!(err.to_string().contains("offset 2"));

        let err = verify_read(Backend::IndexedDb, "k", b"abc", b"ab").unwrap_err();
        assert!(err.to_string().contains("read 2 bytes, expected 3"));
    }

    #[test]
    fn main_context_backends_run_in_fixed_order() {
        let platform = Platform::new(std::env::temp_dir());
        let options = BackendOptions {
            op_timeout: Duration::from_secs(1),
            verify: true,
        };
        let order: Vec<Backend> = main_context_backends(&platform, options)
            .iter()
            .map(|b| b.id())
            .collect();
        assert_eq!(order, [Backend::Opfs, Backend::CacheApi, Backend::IndexedDb]);
    }
}
