//! Document key-value store adapter.
//!
//! Each item is its own request: the per-item duration runs from issuing
//! that request to having its value in memory, never from a shared batch
//! start.

use super::{BackendOptions, OpTiming, Stopwatch, StorageBackend, transfer, verify_read};
use crate::config::Backend;
use crate::error::Result;
use crate::keys::{DB_NAME, DB_STORE, DB_VERSION, INDEXED_DB_KEY, item_key};
use crate::platform::{Database, IdbFactory, Platform};
use crate::workload::Workload;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io;

pub struct IndexedDbBackend {
    factory: IdbFactory,
    stopwatch: Stopwatch,
    verify: bool,
}

impl IndexedDbBackend {
    pub fn new(platform: &Platform, options: BackendOptions) -> Self {
        Self {
            factory: platform.indexed_db(),
            stopwatch: Stopwatch::new(Backend::IndexedDb, options.op_timeout),
            verify: options.verify,
        }
    }

    async fn open(&self) -> io::Result<Database> {
        self.factory
            .open(DB_NAME, DB_VERSION, |upgrade| {
                if !upgrade.contains_object_store(DB_STORE)? {
                    upgrade.create_object_store(DB_STORE)?;
                }
                Ok(())
            })
            .await
    }

    async fn write_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let key = item_key(INDEXED_DB_KEY, shape, index);
            let db = self.open().await?;

            let ((), elapsed) = self
                .stopwatch
                .time(transfer(
                    Backend::IndexedDb,
                    &key,
                    db.put(DB_STORE, &key, item.clone()),
                ))
                .await?;

            tracing::trace!(key = %key, ?elapsed, "idb put");
            timing.push(elapsed);
        }

        Ok(timing)
    }

    async fn read_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let key = item_key(INDEXED_DB_KEY, shape, index);
            let db = self.open().await?;

            let (value, elapsed) = self
                .stopwatch
                .time(transfer(Backend::IndexedDb, &key, async {
                    db.get(DB_STORE, &key).await?.ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "no record for key")
                    })
                }))
                .await?;

            if self.verify {
                verify_read(Backend::IndexedDb, &key, item, &value)?;
            }
            tracing::trace!(key = %key, ?elapsed, "idb get");
            timing.push(elapsed);
        }

        Ok(timing)
    }
}

impl StorageBackend for IndexedDbBackend {
    fn id(&self) -> Backend {
        Backend::IndexedDb
    }

    fn write<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.write_items(workload).boxed()
    }

    fn read<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.read_items(workload).boxed()
    }
}
