//! HTTP-response cache.
//!
//! Each named cache is a directory. An entry is stored as two files named by
//! the SHA-256 of the request URL: the response body and a JSON head
//! (status, headers, body length). The head is renamed into place last, so
//! an entry becomes matchable only after its body is durable.

use super::{Platform, validate_name};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Entry point to the named caches.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    platform: Platform,
}

impl CacheStorage {
    pub(crate) fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Open (creating if needed) the cache called `name`.
    pub async fn open(&self, name: &str) -> io::Result<Cache> {
        self.platform.open_delay().await;
        validate_name("cache", name)?;
        let dir = self.platform.caches_root().join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Cache { dir })
    }

    /// Delete the cache called `name`. Returns `false` if it did not exist.
    pub async fn delete(&self, name: &str) -> io::Result<bool> {
        validate_name("cache", name)?;
        match tokio::fs::remove_dir_all(self.platform.caches_root().join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Response stored into a cache.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    /// A `200 OK` binary response carrying `body`.
    pub fn new(body: Bytes) -> Self {
        let headers = vec![
            ("content-type".to_string(), "application/octet-stream".to_string()),
            ("content-length".to_string(), body.len().to_string()),
        ];
        Self {
            status: 200,
            headers,
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseHead {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body_len: u64,
}

/// An opened named cache.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Store `response` for `url`, replacing any previous entry.
    pub async fn put(&self, url: &str, response: Response) -> io::Result<()> {
        let (body_path, head_path) = self.entry_paths(url);

        let body_tmp = tmp_path(&body_path);
        let mut file = tokio::fs::File::create(&body_tmp).await?;
        file.write_all(&response.body).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&body_tmp, &body_path).await?;

        let head = ResponseHead {
            url: url.to_string(),
            status: response.status,
            headers: response.headers,
            body_len: response.body.len() as u64,
        };
        let head_tmp = tmp_path(&head_path);
        tokio::fs::write(&head_tmp, serde_json::to_vec(&head)?).await?;
        tokio::fs::rename(&head_tmp, &head_path).await
    }

    /// Look up the entry for `url`.
    pub async fn match_url(&self, url: &str) -> io::Result<Option<CachedResponse>> {
        let (body_path, head_path) = self.entry_paths(url);
        let raw = match tokio::fs::read(&head_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let head: ResponseHead = serde_json::from_slice(&raw)?;
        if head.url != url {
            return Ok(None);
        }
        Ok(Some(CachedResponse { head, body_path }))
    }

    /// Remove the entry for `url`. Returns `false` if there was none.
    pub async fn delete(&self, url: &str) -> io::Result<bool> {
        let (body_path, head_path) = self.entry_paths(url);
        match tokio::fs::remove_file(&head_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }
        match tokio::fs::remove_file(&body_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let stem = hex::encode(Sha256::digest(url.as_bytes()));
        (
            self.dir.join(format!("{stem}.body")),
            self.dir.join(format!("{stem}.head")),
        )
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Response returned by [`Cache::match_url`]; the body is read on demand.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    head: ResponseHead,
    body_path: PathBuf,
}

impl CachedResponse {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// Value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Read the whole body into memory.
    pub async fn array_buffer(&self) -> io::Result<Bytes> {
        let body = tokio::fs::read(&self.body_path).await?;
        if body.len() as u64 != self.head.body_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cached body for {} is truncated: expected {} bytes, read {}",
                    self.head.url,
                    self.head.body_len,
                    body.len()
                ),
            ));
        }
        Ok(Bytes::from(body))
    }
}
