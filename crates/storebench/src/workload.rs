//! Deterministic workload generation.
//!
//! Every payload follows the same content law: the byte at offset `i` is
//! `i mod 256`. Reads can therefore be verified against the law alone,
//! without keeping a checksum around.

// Truncation to u8 is the content law itself.
#![allow(clippy::cast_possible_truncation)]

use crate::config::{BenchmarkConfig, WorkloadShape};
use bytes::Bytes;

/// Immutable byte payload shared between contexts without copying.
pub type Payload = Bytes;

/// Generate a single payload of exactly `size` bytes.
///
/// The buffer is filled in place and frozen into `Bytes` without an
/// intermediate copy, which matters for the 100 MiB workload.
pub fn generate_single(size: usize) -> Payload {
    let buffer: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
    Bytes::from(buffer)
}

/// Generate `count` payloads of `size` bytes each.
pub fn generate_many(count: usize, size: usize) -> Vec<Payload> {
    (0..count).map(|_| generate_single(size)).collect()
}

/// Check that `data` follows the content law.
pub fn verify_pattern(data: &[u8]) -> bool {
    data.iter().enumerate().all(|(i, &b)| b == (i % 256) as u8)
}

/// Workload handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// One large blob.
    Single(Payload),
    /// An ordered sequence of small blobs.
    Many(Vec<Payload>),
}

impl Workload {
    /// One blob of `size` bytes.
    pub fn single(size: usize) -> Self {
        Self::Single(generate_single(size))
    }

    /// `count` blobs of `size` bytes each.
    pub fn many(count: usize, size: usize) -> Self {
        Self::Many(generate_many(count, size))
    }

    /// Build the workload of the given shape from the session config.
    pub fn for_shape(shape: WorkloadShape, config: &BenchmarkConfig) -> Self {
        match shape {
            WorkloadShape::SingleFile => Self::single(config.single_file_bytes),
            WorkloadShape::MultipleFiles => Self::many(config.file_count, config.file_bytes),
        }
    }

    pub fn shape(&self) -> WorkloadShape {
        match self {
            Self::Single(_) => WorkloadShape::SingleFile,
            Self::Many(_) => WorkloadShape::MultipleFiles,
        }
    }

    /// Payloads in key order.
    pub fn items(&self) -> &[Payload] {
        match self {
            Self::Single(payload) => std::slice::from_ref(payload),
            Self::Many(payloads) => payloads,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Total bytes across all items.
    pub fn total_bytes(&self) -> u64 {
        self.items().iter().map(|p| p.len() as u64).sum()
    }
}
