//! Origin-private file system through sync access handles.
//!
//! Blocking, and only usable on the worker context; the coordinator owns the
//! thread this runs on.

use super::{BackendOptions, OpTiming, Stopwatch, verify_read};
use crate::config::Backend;
use crate::error::{BenchError, Result};
use crate::keys::{OPFS_SYNC_FILE, item_key};
use crate::platform::{self, DirectoryHandle, Platform, StorageManager};
use crate::workload::Workload;
use bytes::Bytes;
use std::io;

pub struct OpfsSyncBackend {
    platform: Platform,
    storage: StorageManager,
    stopwatch: Stopwatch,
    verify: bool,
}

impl OpfsSyncBackend {
    pub fn new(platform: &Platform, options: BackendOptions) -> Self {
        Self {
            platform: platform.clone(),
            storage: platform.storage(),
            stopwatch: Stopwatch::new(Backend::OpfsSync, options.op_timeout),
            verify: options.verify,
        }
    }

    /// Fail with `BackendUnavailable` unless sync handles can be created here.
    pub fn check_available(&self) -> Result<()> {
        if !self.platform.supports_sync_access_handles() {
            return Err(BenchError::BackendUnavailable {
                backend: Backend::OpfsSync,
                reason: "sync access handles are not supported on this platform".to_string(),
            });
        }
        if !platform::in_worker_context() {
            return Err(BenchError::BackendUnavailable {
                backend: Backend::OpfsSync,
                reason: "sync access handles require the worker context".to_string(),
            });
        }
        Ok(())
    }

    /// Persist the workload, one timed sample per item.
    pub fn write(&self, workload: &Workload) -> Result<OpTiming> {
        self.write_cancellable(workload, &|| false)
    }

    /// Read the workload back, one timed sample per item.
    pub fn read(&self, workload: &Workload) -> Result<OpTiming> {
        self.read_cancellable(workload, &|| false)
    }

    /// Like [`write`](Self::write), but `cancelled` is polled before every
    /// item and stops the loop with `Cancelled`.
    pub fn write_cancellable(
        &self,
        workload: &Workload,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<OpTiming> {
        self.check_available()?;
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            check_cancelled(cancelled)?;
            let key = item_key(OPFS_SYNC_FILE, shape, index);
            let root = self.storage.get_directory_blocking()?;

            let ((), elapsed) = self.stopwatch.time_blocking(|| {
                write_item(&root, &key, item)
                    .map_err(|e| BenchError::from_io(Backend::OpfsSync, &key, &e))
            })?;

            tracing::trace!(key = %key, ?elapsed, "opfs sync write");
            timing.push(elapsed);
        }

        Ok(timing)
    }

    /// Like [`read`](Self::read), with the same cancellation points as
    /// [`write_cancellable`](Self::write_cancellable).
    pub fn read_cancellable(
        &self,
        workload: &Workload,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<OpTiming> {
        self.check_available()?;
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            check_cancelled(cancelled)?;
            let key = item_key(OPFS_SYNC_FILE, shape, index);
            let root = self.storage.get_directory_blocking()?;

            let (data, elapsed) = self.stopwatch.time_blocking(|| {
                read_item(&root, &key).map_err(|e| BenchError::from_io(Backend::OpfsSync, &key, &e))
            })?;

            if self.verify {
                verify_read(Backend::OpfsSync, &key, item, &data)?;
            }
            tracing::trace!(key = %key, ?elapsed, "opfs sync read");
            timing.push(elapsed);
        }

        Ok(timing)
    }
}

fn check_cancelled(cancelled: &dyn Fn() -> bool) -> Result<()> {
    if cancelled() {
        return Err(BenchError::Cancelled {
            backend: Backend::OpfsSync,
        });
    }
    Ok(())
}

fn write_item(root: &DirectoryHandle, key: &str, data: &[u8]) -> io::Result<()> {
    let handle = root.get_file_handle_blocking(key, true)?;
    let mut access = handle.create_sync_access_handle()?;
    access.truncate(0)?;
    access.write(data, 0)?;
    access.flush()?;
    access.close();
    Ok(())
}

fn read_item(root: &DirectoryHandle, key: &str) -> io::Result<Bytes> {
    let handle = root.get_file_handle_blocking(key, false)?;
    let mut access = handle.create_sync_access_handle()?;
    let size = usize::try_from(access.get_size()?).map_err(io::Error::other)?;
    let mut buffer = vec![0u8; size];
    let filled = access.read(&mut buffer, 0)?;
    buffer.truncate(filled);
    access.close();
    Ok(Bytes::from(buffer))
}
