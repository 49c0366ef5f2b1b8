use conscache_storage::StorageError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the consensus cache and its entries.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to determine home directory for default data directory")]
    MissingHomeDir,

    #[error("cache subdirectory {path:?} must be a relative path inside the data directory")]
    InvalidSubdirectory { path: PathBuf },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cache entry {filename} has no owning cache")]
    Orphaned { filename: String },

    #[error("failed to map cache entry {filename}: {source}")]
    Map {
        filename: String,
        #[source]
        source: StorageError,
    },
}

impl CacheError {
    /// Returns true for the errors `CacheEntry::get_body` reports when the body
    /// cannot be mapped.
    pub fn is_mapping_failure(&self) -> bool {
        matches!(self, Self::Orphaned { .. } | Self::Map { .. })
    }
}
