//! Storage keys used by each backend.
//!
//! Keys are reused across runs, so repeated runs measure overwrite cost.

use crate::config::WorkloadShape;

/// File name for the async OPFS backend.
pub const OPFS_FILE: &str = "opfsTestFile";
/// File name for the sync-handle OPFS backend.
pub const OPFS_SYNC_FILE: &str = "opfsSyncTestFile";
/// Request URL for the response cache backend.
pub const CACHE_URL: &str = "/cacheTestFile";
/// Record key for the document store backend.
pub const INDEXED_DB_KEY: &str = "indexedDBTestFile";

/// Name of the response cache opened by the cache backend.
pub const CACHE_NAME: &str = "cacheTest";
/// Database name, version and object store of the document store backend.
pub const DB_NAME: &str = "indexedDBTest";
pub const DB_VERSION: u32 = 1;
pub const DB_STORE: &str = "files";

/// Key for item `index` of a workload of the given shape.
///
/// Single-file workloads use `base` unchanged; multi-file workloads append
/// the index.
pub fn item_key(base: &str, shape: WorkloadShape, index: usize) -> String {
    match shape {
        WorkloadShape::SingleFile => base.to_string(),
        WorkloadShape::MultipleFiles => format!("{base}_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_key_is_fixed() {
        assert_eq!(item_key(OPFS_FILE, WorkloadShape::SingleFile, 0), "opfsTestFile");
        assert_eq!(item_key(OPFS_FILE, WorkloadShape::SingleFile, 7), "opfsTestFile");
    }

    #[test]
    fn multiple_files_keys_are_indexed() {
        assert_eq!(
            item_key(CACHE_URL, WorkloadShape::MultipleFiles, 42),
            "/cacheTestFile_42"
        );
    }
}
