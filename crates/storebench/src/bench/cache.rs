//! HTTP-response cache adapter.

use super::{BackendOptions, OpTiming, Stopwatch, StorageBackend, transfer, verify_read};
use crate::config::Backend;
use crate::error::Result;
use crate::keys::{CACHE_NAME, CACHE_URL, item_key};
use crate::platform::{CacheStorage, Platform, Response};
use crate::workload::Workload;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io;

pub struct CacheBackend {
    caches: CacheStorage,
    stopwatch: Stopwatch,
    verify: bool,
}

impl CacheBackend {
    pub fn new(platform: &Platform, options: BackendOptions) -> Self {
        Self {
            caches: platform.caches(),
            stopwatch: Stopwatch::new(Backend::CacheApi, options.op_timeout),
            verify: options.verify,
        }
    }

    async fn write_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let url = item_key(CACHE_URL, shape, index);
            let cache = self.caches.open(CACHE_NAME).await?;

            let ((), elapsed) = self
                .stopwatch
                .time(transfer(
                    Backend::CacheApi,
                    &url,
                    cache.put(&url, Response::new(item.clone())),
                ))
                .await?;

            tracing::trace!(url = %url, ?elapsed, "cache put");
            timing.push(elapsed);
        }

        Ok(timing)
    }

    async fn read_items(&self, workload: &Workload) -> Result<OpTiming> {
        let shape = workload.shape();
        let mut timing = OpTiming::default();

        for (index, item) in workload.items().iter().enumerate() {
            let url = item_key(CACHE_URL, shape, index);
            let cache = self.caches.open(CACHE_NAME).await?;

            let (body, elapsed) = self
                .stopwatch
                .time(transfer(Backend::CacheApi, &url, async {
                    match cache.match_url(&url).await? {
                        Some(response) => response.array_buffer().await,
                        None => Err(io::Error::new(
                            io::ErrorKind::NotFound,
                            "no cached response",
                        )),
                    }
                }))
                .await?;

            if self.verify {
                verify_read(Backend::CacheApi, &url, item, &body)?;
            }
            tracing::trace!(url = %url, ?elapsed, "cache match");
            timing.push(elapsed);
        }

        Ok(timing)
    }
}

impl StorageBackend for CacheBackend {
    fn id(&self) -> Backend {
        Backend::CacheApi
    }

    fn write<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.write_items(workload).boxed()
    }

    fn read<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
        self.read_items(workload).boxed()
    }
}
