//! Origin-private file system.
//!
//! Writable streams write into a `.crswap` sibling and swap it over the
//! target on `close`, so data becomes visible only once it is durable.
//! Sync access handles write in place.

use super::{Platform, in_worker_context, validate_name};
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Entry point to the origin-private file system.
#[derive(Debug, Clone)]
pub struct StorageManager {
    platform: Platform,
}

impl StorageManager {
    pub(crate) fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Get the root directory handle.
    pub async fn get_directory(&self) -> io::Result<DirectoryHandle> {
        self.platform.open_delay().await;
        let path = self.platform.opfs_root();
        tokio::fs::create_dir_all(&path).await?;
        Ok(DirectoryHandle::new(path, &self.platform))
    }

    /// Blocking variant of [`get_directory`](Self::get_directory) for the
    /// worker context.
    pub fn get_directory_blocking(&self) -> io::Result<DirectoryHandle> {
        self.platform.open_delay_blocking();
        let path = self.platform.opfs_root();
        std::fs::create_dir_all(&path)?;
        Ok(DirectoryHandle::new(path, &self.platform))
    }
}

/// Handle to a directory.
#[derive(Debug, Clone)]
pub struct DirectoryHandle {
    path: PathBuf,
    sync_access: bool,
}

impl DirectoryHandle {
    fn new(path: PathBuf, platform: &Platform) -> Self {
        Self {
            path,
            sync_access: platform.supports_sync_access_handles(),
        }
    }

    /// Look up a file, creating an empty one when `create` is set.
    ///
    /// Fails with `NotFound` if the file is missing and `create` is unset.
    pub async fn get_file_handle(&self, name: &str, create: bool) -> io::Result<FileHandle> {
        let path = self.entry_path(name)?;
        if create {
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .await?;
        } else if !tokio::fs::metadata(&path).await?.is_file() {
            return Err(not_a_file(&path));
        }
        Ok(self.file_handle(path))
    }

    /// Blocking variant of [`get_file_handle`](Self::get_file_handle).
    pub fn get_file_handle_blocking(&self, name: &str, create: bool) -> io::Result<FileHandle> {
        let path = self.entry_path(name)?;
        if create {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
        } else if !std::fs::metadata(&path)?.is_file() {
            return Err(not_a_file(&path));
        }
        Ok(self.file_handle(path))
    }

    fn entry_path(&self, name: &str) -> io::Result<PathBuf> {
        validate_name("file", name)?;
        Ok(self.path.join(name))
    }

    fn file_handle(&self, path: PathBuf) -> FileHandle {
        FileHandle {
            path,
            sync_access: self.sync_access,
        }
    }
}

fn not_a_file(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} is not a file", path.display()),
    )
}

/// Handle to a file entry.
#[derive(Debug, Clone)]
pub struct FileHandle {
    path: PathBuf,
    sync_access: bool,
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a writable stream that replaces the file contents on close.
    pub async fn create_writable(&self) -> io::Result<WritableFileStream> {
        let mut swap = self.path.clone().into_os_string();
        swap.push(".crswap");
        let swap = PathBuf::from(swap);
        let file = tokio::fs::File::create(&swap).await?;
        Ok(WritableFileStream {
            file,
            swap,
            target: self.path.clone(),
        })
    }

    /// Snapshot the file for reading.
    pub async fn get_file(&self) -> io::Result<FileBlob> {
        let size = tokio::fs::metadata(&self.path).await?.len();
        Ok(FileBlob {
            path: self.path.clone(),
            size,
        })
    }

    /// Open an exclusive synchronous handle.
    ///
    /// Only available on the worker context of a platform that supports it;
    /// fails with `Unsupported` otherwise.
    pub fn create_sync_access_handle(&self) -> io::Result<SyncAccessHandle> {
        if !self.sync_access {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sync access handles are not supported on this platform",
            ));
        }
        if !in_worker_context() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sync access handles are only available on the worker context",
            ));
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(SyncAccessHandle { file })
    }
}

/// Stream returned by [`FileHandle::create_writable`].
#[derive(Debug)]
pub struct WritableFileStream {
    file: tokio::fs::File,
    swap: PathBuf,
    target: PathBuf,
}

impl WritableFileStream {
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    /// Flush, sync and swap the written data over the target file.
    pub async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.swap, &self.target).await
    }
}

/// Immutable snapshot of a file, materialized on demand.
#[derive(Debug, Clone)]
pub struct FileBlob {
    path: PathBuf,
    size: u64,
}

impl FileBlob {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole file into memory.
    ///
    /// Fails with `InvalidData` if the file changed size since the snapshot.
    pub async fn array_buffer(&self) -> io::Result<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        if data.len() as u64 != self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} changed size: expected {} bytes, read {}",
                    self.path.display(),
                    self.size,
                    data.len()
                ),
            ));
        }
        Ok(Bytes::from(data))
    }
}

/// Synchronous, positioned access to a file.
#[derive(Debug)]
pub struct SyncAccessHandle {
    file: File,
}

impl SyncAccessHandle {
    pub fn get_size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    /// Write all of `data` at offset `at`.
    pub fn write(&mut self, data: &[u8], at: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(at))?;
        self.file.write_all(data)?;
        Ok(data.len())
    }

    /// Read into `buf` from offset `at`; returns the bytes read, short only at
    /// end of file.
    pub fn read(&mut self, buf: &mut [u8], at: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(at))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    pub fn close(self) {
        drop(self.file);
    }
}
