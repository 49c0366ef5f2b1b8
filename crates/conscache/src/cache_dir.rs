use crate::error::CacheError;
use std::path::{Component, Path, PathBuf};

/// Configuration for selecting the data directory caches live under.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Override the data directory (the cache subdirectory is still appended).
    pub data_dir_override: Option<PathBuf>,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir_override: std::env::var_os("CONSCACHE_DATA_DIR").map(PathBuf::from),
        }
    }

    /// Returns the data directory, honoring the override.
    pub fn data_dir(&self) -> Result<PathBuf, CacheError> {
        match &self.data_dir_override {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    /// Returns the directory a cache named `subdirectory` is stored in.
    pub fn cache_path(&self, subdirectory: impl AsRef<Path>) -> Result<PathBuf, CacheError> {
        let subdirectory = subdirectory.as_ref();
        let escapes = subdirectory.as_os_str().is_empty()
            || subdirectory
                .components()
                .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(CacheError::InvalidSubdirectory {
                path: subdirectory.to_path_buf(),
            });
        }

        Ok(self.data_dir()?.join(subdirectory))
    }
}

pub(crate) fn default_data_dir() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".conscache"))
}
