//! Storage directory service for labelled documents.
//!
//! A [`StorageDir`] owns one directory of immutable documents. Each document
//! carries an ordered set of key/value [`Labels`] and an opaque body, and is
//! read back through a memory mapping ([`LabelledMap`]).
//!
//! ## Format
//! Each document file is stored as:
//! - a fixed-size header (32 bytes, little-endian): magic, format version,
//!   label block length, body length
//! - the label block, `bincode`-encoded
//! - the body, verbatim
//!
//! Bodies are not checksummed; the header and label block are validated on
//! every mapping.
//!
//! ## Directory layout
//! - `doc-<sequence>`: one document per file; the zero-padded sequence grows
//!   monotonically, so listing order is creation order
//! - `.lock`: advisory lock held while the directory is bound
//! - `.<name>.tmp.<pid>.<n>`: in-flight atomic writes

mod dir;
mod header;
mod labels;
mod lock;
mod persisted;
mod write;

pub use dir::{StorageDir, FILE_PREFIX};
pub use header::{StorageHeader, FORMAT_VERSION, HEADER_LEN, MAGIC};
pub use labels::{wipe_string, Label, Labels, LABELS_LIMIT_BYTES};
pub use persisted::{LabelledMap, StorageError};
pub use write::write_labelled_atomic;
