//! On-disk cache of immutable, labelled documents (such as network-consensus
//! snapshots), indexed in memory by label.
//!
//! A [`ConsensusCache`] binds one storage directory (see `conscache-storage`)
//! and keeps an insertion-ordered index of [`CacheEntry`] handles. Entries are
//! reference counted; their bodies are memory-mapped the first time a holder
//! asks for them and stay mapped until the last holder releases the entry.
//!
//! ## Lifecycle
//! - [`ConsensusCache::open`] binds `<data_dir>/<subdirectory>` and indexes the
//!   documents already there. Unreadable files are skipped.
//! - [`ConsensusCache::add`] persists a new document and indexes it.
//! - [`ConsensusCache::find_first`], [`ConsensusCache::find_all`] and
//!   [`ConsensusCache::filter_list`] query by exact label match.
//! - [`CacheEntry::mark_for_removal`] flags a document; the file is deleted by
//!   [`ConsensusCache::delete_pending`] once only the index holds it.
//! - Dropping the cache orphans entries held elsewhere: their labels remain
//!   readable and already-mapped bodies stay valid, but unmapped bodies can no
//!   longer be mapped.
//!
//! Everything here is single-threaded: handles are `Rc`-based and `!Send`.
//!
//! The data directory defaults to `~/.conscache` and can be overridden with
//! `CONSCACHE_DATA_DIR` or [`CacheConfig::data_dir_override`].

mod cache;
mod cache_dir;
mod entry;
mod error;

pub use cache::ConsensusCache;
pub use cache_dir::CacheConfig;
pub use conscache_storage::{Label, Labels, StorageError};
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
