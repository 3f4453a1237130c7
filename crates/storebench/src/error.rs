//! Error types for backend measurements.

use crate::config::Backend;
use serde::Serialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while measuring a backend.
#[derive(Error, Debug)]
pub enum BenchError {
    /// The capability backing this backend is missing in the current context.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// Read attempted for a key that has no entry.
    #[error("{backend}: no entry for key '{key}'")]
    NotFound { backend: Backend, key: String },

    /// The storage engine failed while transferring data.
    #[error("{backend}: transfer failed for key '{key}': {reason}")]
    TransferFailure {
        backend: Backend,
        key: String,
        reason: String,
    },

    /// The operation did not complete within its deadline.
    #[error("{backend}: timed out after {after:?}")]
    Timeout { backend: Backend, after: Duration },

    /// The worker context stopped accepting requests.
    #[error("worker context is no longer running")]
    WorkerGone,

    /// The measurement was abandoned because its run was superseded or the
    /// worker is shutting down.
    #[error("{backend}: cancelled")]
    Cancelled { backend: Backend },

    /// Setup I/O outside of any backend transfer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BenchError {
    /// Classify a storage-layer I/O error raised for `key`.
    ///
    /// `NotFound` and `Unsupported` keep their meaning; everything else is a
    /// transfer failure.
    pub fn from_io(backend: Backend, key: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                backend,
                key: key.to_string(),
            },
            io::ErrorKind::Unsupported => Self::BackendUnavailable {
                backend,
                reason: err.to_string(),
            },
            _ => Self::TransferFailure {
                backend,
                key: key.to_string(),
                reason: err.to_string(),
            },
        }
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TransferFailure { .. } | Self::Io(_) => ErrorKind::TransferFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::WorkerGone => ErrorKind::WorkerGone,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Error category kept in the results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BackendUnavailable,
    NotFound,
    TransferFailure,
    Timeout,
    WorkerGone,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BackendUnavailable => "unavailable",
            Self::NotFound => "not found",
            Self::TransferFailure => "transfer failure",
            Self::Timeout => "timeout",
            Self::WorkerGone => "worker gone",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let mapped = BenchError::from_io(Backend::Opfs, "opfsTestFile", &err);
        assert_eq!(mapped.kind(), ErrorKind::NotFound);
        assert!(mapped.to_string().contains("opfsTestFile"));
    }

    #[test]
    fn io_unsupported_maps_to_unavailable() {
        let err = io::Error::new(io::ErrorKind::Unsupported, "no sync handles");
        let mapped = BenchError::from_io(Backend::OpfsSync, "opfsSyncTestFile", &err);
        assert_eq!(mapped.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn other_io_maps_to_transfer_failure() {
        let err = io::Error::other("disk on fire");
        let mapped = BenchError::from_io(Backend::CacheApi, "/cacheTestFile", &err);
        assert_eq!(mapped.kind(), ErrorKind::TransferFailure);
        assert!(mapped.to_string().contains("disk on fire"));
    }
}
