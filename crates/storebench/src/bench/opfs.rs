//! Origin-private file system through async writable streams.

use super::{BackendOptions, OpTiming, Stopwatch, StorageBackend, transfer, verify_read};
use crate::config::Backend;
use crate::error::Result;
use crate::keys::{OPFS_FILE, item_key};
use crate::platform::{Platform, StorageManager};
use crate::workload::Workload;
use futures::FutureExt;
use futures::future::BoxFuture;

/// Async OPFS adapter, main context.
pub struct OpfsBackend {
    storage: StorageManager,
    stopwatch: Stopwatch,
    verify: bool,
}

impl OpfsBackend {
    pub fn new(platform: &Platform, options: BackendOptions) -> Self {
        Self {
            storage: platform.storage(),
            stopwatch: Stopwatch::new(Backend::Opfs, options.op_timeout),
            verify: options.verify,
        }
    }

    async fn write_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let key = item_key(OPFS_FILE, shape, index);
            let root = self.storage.get_directory().await?;

            let ((), elapsed) = self
                .stopwatch
                .time(transfer(Backend::Opfs, &key, async {
                    let handle = root.get_file_handle(&key, true).await?;
                    let mut stream = handle.create_writable().await?;
                    stream.write(item).await?;
                    stream.close().await
                }))
                .await?;

            tracing::trace!(key = %key, ?elapsed, "opfs write");
            timing.push(elapsed);
        }

        Ok(timing)
    }

    async fn read_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let key = item_key(OPFS_FILE, shape, index);
            let root = self.storage.get_directory().await?;

            let (data, elapsed) = self
                .stopwatch
                .time(transfer(Backend::Opfs, &key, async {
                    let handle = root.get_file_handle(&key, false).await?;
                    handle.get_file().await?.array_buffer().await
                }))
                .await?;

            if self.verify {
                verify_read(Backend::Opfs, &key, item, &data)?;
            }
            tracing::trace!(key = %key, ?elapsed, "opfs read");
            timing.push(elapsed);
        }

        Ok(timing)
    }
}

impl StorageBackend for OpfsBackend {
    fn id(&self) -> Backend {
        Backend::Opfs
    }

    fn write<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.write_items(workload).boxed()
    }

    fn read<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.read_items(workload).boxed()
    }
}
