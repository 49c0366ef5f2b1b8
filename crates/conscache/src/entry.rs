use crate::error::{CacheError, Result};
use conscache_storage::{wipe_string, LabelledMap, Labels, StorageDir};
use std::cell::{Cell, OnceCell};
use std::rc::{Rc, Weak};

/// A reference-counted handle to one labelled document in a
/// [`crate::ConsensusCache`].
///
/// Every live handle is one holder of the entry; the cache's own index is
/// another. [`CacheEntry::incref`] creates a holder and [`CacheEntry::decref`]
/// consumes one, so a handle can never be released twice. When the last holder
/// goes away the body mapping (if any) is released and the filename and labels
/// are zeroed before being freed.
///
/// The body is mapped lazily on the first [`CacheEntry::get_body`] and the
/// mapping is then kept for the rest of the entry's life.
pub struct CacheEntry {
    inner: Rc<EntryInner>,
}

struct EntryInner {
    filename: String,
    labels: Labels,
    can_remove: Cell<bool>,
    /// Binding of the cache that owns this entry. Dead once the cache closes.
    dir: Weak<StorageDir>,
    map: OnceCell<LabelledMap>,
}

impl CacheEntry {
    pub(crate) fn new(filename: String, labels: Labels, dir: Weak<StorageDir>) -> Self {
        Self {
            inner: Rc::new(EntryInner {
                filename,
                labels,
                can_remove: Cell::new(false),
                dir,
                map: OnceCell::new(),
            }),
        }
    }

    /// Adds a holder, returning its handle.
    pub fn incref(&self) -> CacheEntry {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Releases this holder. The entry is destroyed when no holders remain.
    pub fn decref(self) {
        drop(self);
    }

    /// Number of live holders, including the cache's index while the entry is
    /// listed there.
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Returns true if both handles refer to the same entry.
    pub fn ptr_eq(&self, other: &CacheEntry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Marks the backing file for deletion once nothing needs it anymore.
    ///
    /// Pure metadata; see [`crate::ConsensusCache::delete_pending`].
    pub fn mark_for_removal(&self) {
        self.inner.can_remove.set(true);
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.inner.can_remove.get()
    }

    pub fn filename(&self) -> &str {
        &self.inner.filename
    }

    /// Value of the first label keyed `key`.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.inner.labels.get(key)
    }

    pub fn get_labels(&self) -> &Labels {
        &self.inner.labels
    }

    pub fn is_mapped(&self) -> bool {
        self.inner.map.get().is_some()
    }

    /// Returns true once the owning cache has been closed.
    pub fn is_orphaned(&self) -> bool {
        self.inner.dir.strong_count() == 0
    }

    /// Returns the document body, mapping it on first use.
    ///
    /// Fails if the entry is unmapped and its cache is gone, or if the file
    /// cannot be mapped. A failed call leaves the entry unmapped, so a later
    /// call tries again.
    pub fn get_body(&self) -> Result<&[u8]> {
        if let Some(map) = self.inner.map.get() {
            return Ok(map.body());
        }

        let dir = self
            .inner
            .dir
            .upgrade()
            .ok_or_else(|| CacheError::Orphaned {
                filename: self.inner.filename.clone(),
            })?;

        let map = dir
            .map_labelled(&self.inner.filename)
            .map_err(|source| CacheError::Map {
                filename: self.inner.filename.clone(),
                source,
            })?;

        tracing::trace!(
            target = "conscache",
            filename = %self.inner.filename,
            body_len = map.body().len(),
            mmap = map.is_mmap(),
            "mapped cache entry"
        );

        Ok(self.inner.map.get_or_init(|| map).body())
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        self.incref()
    }
}

/// Handles compare by identity.
impl PartialEq for CacheEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for CacheEntry {}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("filename", &self.inner.filename)
            .field("labels", &self.inner.labels)
            .field("refcount", &self.refcount())
            .field("can_remove", &self.inner.can_remove.get())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl Drop for EntryInner {
    fn drop(&mut self) {
        tracing::trace!(
            target = "conscache",
            filename = %self.filename,
            mapped = self.map.get().is_some(),
            can_remove = self.can_remove.get(),
            "releasing cache entry"
        );
        self.wipe();
    }
}

impl EntryInner {
    /// Unmaps the body, then zeroes the labels and the filename.
    fn wipe(&mut self) {
        drop(self.map.take());
        self.labels.wipe();
        wipe_string(&mut self.filename);
    }
}
