use crate::cache_dir::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use conscache_storage::{Labels, StorageDir};
use std::borrow::Borrow;
use std::path::Path;
use std::rc::Rc;

/// An on-disk cache of immutable labelled documents, indexed in memory by
/// label.
///
/// The cache holds one unit of every entry it lists. Closing (or dropping)
/// the cache releases those units and unbinds the storage directory; entries
/// still held elsewhere stay valid but can no longer map their bodies.
pub struct ConsensusCache {
    dir: Rc<StorageDir>,
    entries: Vec<CacheEntry>,
}

impl ConsensusCache {
    /// Opens the cache stored in `subdirectory` of the configured data
    /// directory (see [`CacheConfig::from_env`]).
    pub fn open(subdirectory: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        Self::open_with_config(&CacheConfig::from_env(), subdirectory, max_entries)
    }

    /// Opens the cache stored in `subdirectory` of `config`'s data directory,
    /// creating it if needed, and indexes every document already persisted
    /// there.
    ///
    /// `max_entries` bounds the number of stored documents; `0` means
    /// unbounded.
    pub fn open_with_config(
        config: &CacheConfig,
        subdirectory: impl AsRef<Path>,
        max_entries: usize,
    ) -> Result<Self> {
        let path = config.cache_path(subdirectory)?;
        let dir = StorageDir::bind(&path, max_entries)?;

        let mut cache = Self {
            dir: Rc::new(dir),
            entries: Vec::new(),
        };
        cache.rescan()?;

        tracing::debug!(
            target = "conscache",
            path = %path.display(),
            max_entries,
            entries = cache.entries.len(),
            "opened consensus cache"
        );
        Ok(cache)
    }

    /// Closes the cache. Equivalent to dropping it.
    pub fn close(self) {
        drop(self);
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every indexed entry, in insertion order.
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Persists `data` with a copy of `labels` and indexes it.
    ///
    /// The returned entry is held only by the index; call
    /// [`CacheEntry::incref`] to keep it independently of the cache.
    pub fn add(&mut self, labels: &Labels, data: &[u8]) -> Result<&CacheEntry> {
        let filename = self.dir.save_labelled(labels, data)?;
        let entry = CacheEntry::new(filename, labels.clone(), Rc::downgrade(&self.dir));
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Returns the first entry, in index order, whose `key` label is `value`.
    pub fn find_first(&self, key: &str, value: &str) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|entry| entry_matches(entry, key, value))
    }

    /// Returns every entry whose `key` label is `value`, in index order.
    pub fn find_all(&self, key: &str, value: &str) -> Vec<&CacheEntry> {
        let mut found: Vec<&CacheEntry> = self.entries.iter().collect();
        Self::filter_list(&mut found, key, value);
        found
    }

    /// Removes from `list`, in place, every entry whose `key` label is not
    /// `value`. The remaining entries keep their relative order.
    ///
    /// Works on borrowed entries as well as owned handles, so a working set
    /// can be narrowed by one label at a time.
    pub fn filter_list<E>(list: &mut Vec<E>, key: &str, value: &str)
    where
        E: Borrow<CacheEntry>,
    {
        list.retain(|entry| entry_matches(entry.borrow(), key, value));
    }

    /// Deletes the files of entries that are marked for removal and held by
    /// nothing but this cache, dropping them from the index. Marked entries
    /// still held elsewhere are kept for a later call.
    ///
    /// Returns the number of entries deleted.
    pub fn delete_pending(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let mut deleted = 0usize;

        for entry in entries {
            if !entry.is_marked_for_removal() || entry.refcount() > 1 {
                self.entries.push(entry);
                continue;
            }

            let filename = entry.filename().to_owned();
            // Unmap before unlinking.
            entry.decref();
            match self.dir.remove_file(&filename) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    tracing::warn!(
                        target = "conscache",
                        filename = %filename,
                        error = %err,
                        "failed to delete cache entry marked for removal"
                    );
                }
            }
        }

        if deleted > 0 {
            tracing::debug!(
                target = "conscache",
                deleted,
                remaining = self.entries.len(),
                "deleted cache entries marked for removal"
            );
        }
        deleted
    }

    /// How many more documents can be added before the directory is full, or
    /// `None` if the cache is unbounded.
    pub fn n_filenames_available(&self) -> Option<usize> {
        let max = self.dir.max_files();
        if max == 0 {
            return None;
        }
        Some(max.saturating_sub(self.dir.n_files()))
    }

    /// Builds the index from whatever is persisted in the directory.
    ///
    /// Only called while opening, when the index is still empty. Each file is
    /// mapped once to read its labels and unmapped right away; files that
    /// cannot be mapped are skipped.
    fn rescan(&mut self) -> Result<()> {
        debug_assert!(self.entries.is_empty());

        let mut skipped = 0usize;
        for filename in self.dir.list()? {
            let map = match self.dir.map_labelled(&filename) {
                Ok(map) => map,
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        target = "conscache",
                        path = %self.dir.path().display(),
                        filename = %filename,
                        error = %err,
                        "skipping unreadable cache file"
                    );
                    continue;
                }
            };

            let labels = map.into_labels();
            self.entries
                .push(CacheEntry::new(filename, labels, Rc::downgrade(&self.dir)));
        }

        tracing::debug!(
            target = "conscache",
            path = %self.dir.path().display(),
            entries = self.entries.len(),
            skipped,
            "rescanned cache directory"
        );
        Ok(())
    }
}

fn entry_matches(entry: &CacheEntry, key: &str, value: &str) -> bool {
    entry.get_labels().matches(key, value)
}

impl Drop for ConsensusCache {
    fn drop(&mut self) {
        let still_held = self
            .entries
            .iter()
            .filter(|entry| entry.refcount() > 1)
            .count();
        tracing::debug!(
            target = "conscache",
            path = %self.dir.path().display(),
            entries = self.entries.len(),
            still_held,
            "closing consensus cache"
        );

        // Release the index's units first; `dir` is unbound afterwards, which
        // orphans every entry still held elsewhere.
        self.entries.clear();
    }
}

impl std::fmt::Debug for ConsensusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusCache")
            .field("path", &self.dir.path())
            .field("max_entries", &self.dir.max_files())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> CacheConfig {
        CacheConfig {
            data_dir_override: Some(root.to_path_buf()),
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().copied().collect()
    }

    #[test]
    fn rescanned_entries_start_unmapped() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut cache = ConsensusCache::open_with_config(&config(tmp.path()), "c", 0).unwrap();
            let entry = cache.add(&labels(&[("type", "consensus")]), b"body").unwrap();
            // Freshly added entries are unmapped too.
            assert!(!entry.is_mapped());
        }

        let cache = ConsensusCache::open_with_config(&config(tmp.path()), "c", 0).unwrap();
        assert_eq!(cache.len(), 1);
        let entry = &cache.entries()[0];
        assert!(!entry.is_mapped());
        assert_eq!(entry.refcount(), 1);
        assert_eq!(entry.get_body().unwrap(), b"body");
        assert!(entry.is_mapped());
    }

    #[test]
    fn indexed_entries_point_at_their_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ConsensusCache::open_with_config(&config(tmp.path()), "c", 0).unwrap();
        cache.add(&labels(&[("k", "v")]), b"x").unwrap();
        for entry in cache.entries() {
            assert!(!entry.is_orphaned());
        }
        assert_eq!(cache.path(), tmp.path().join("c").as_path());
    }
}
