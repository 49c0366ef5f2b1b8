use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::header::{StorageHeader, HEADER_LEN};
use crate::labels::{decode_labels, Labels};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("unsupported format version: expected {expected}, found {found}")]
    WrongFormatVersion { expected: u32, found: u32 },
    #[error("truncated file: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("label block error: {0}")]
    Labels(#[from] bincode::Error),
    #[error("label block of {labels_len} bytes exceeds the size limit")]
    OversizedLabels { labels_len: u64 },
    #[error("body size {body_len} does not fit into addressable memory")]
    OversizedBody { body_len: u64 },
    #[error("storage directory is full ({max_files} files)")]
    Full { max_files: usize },
    #[error("document filename sequence is exhausted")]
    SequenceExhausted,
    #[error("invalid document filename {0:?}")]
    InvalidFilename(String),
    #[error("storage directory {0} is locked by another process")]
    Locked(String),
}

enum Backing {
    Mmap(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mmap(mmap) => &mmap[..],
            Backing::Owned(bytes) => bytes.as_slice(),
        }
    }
}

/// A document file mapped into memory, with its labels decoded and its body
/// located.
///
/// Dropping the value releases the mapping.
pub struct LabelledMap {
    labels: Labels,
    backing: Backing,
    body_offset: usize,
    body_len: usize,
}

impl std::fmt::Debug for LabelledMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelledMap")
            .field("labels", &self.labels)
            .field("body_len", &self.body_len)
            .field("mmap", &self.is_mmap())
            .finish_non_exhaustive()
    }
}

impl LabelledMap {
    /// Maps the document at `path`.
    ///
    /// mmap is the fast path. If it fails, the file is read into memory instead.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: file_len,
            });
        }

        // Safety: document files are immutable once renamed into place; the
        // storage directory never rewrites a published file.
        let backing = match unsafe { MmapOptions::new().map(&file) } {
            Ok(mmap) => Backing::Mmap(mmap),
            Err(err) => {
                tracing::debug!(
                    target = "conscache.storage",
                    path = %path.display(),
                    error = %err,
                    "mmap failed; reading document into memory"
                );
                Backing::Owned(std::fs::read(path)?)
            }
        };

        Self::from_backing(backing)
    }

    fn from_backing(backing: Backing) -> Result<Self, StorageError> {
        let bytes = backing.bytes();
        let header = StorageHeader::decode(bytes)?;

        let body_offset = header.body_offset()?;
        let expected = header.file_len()?;
        if bytes.len() < expected {
            return Err(StorageError::Truncated {
                expected,
                found: bytes.len(),
            });
        }

        let labels = decode_labels(&bytes[HEADER_LEN..body_offset])?;
        let body_len = expected - body_offset;

        Ok(Self {
            labels,
            backing,
            body_offset,
            body_len,
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// The document body. The slice stays valid for as long as `self` does.
    pub fn body(&self) -> &[u8] {
        &self.backing.bytes()[self.body_offset..self.body_offset + self.body_len]
    }

    /// Returns true if the body is served from an mmap rather than a heap copy.
    pub fn is_mmap(&self) -> bool {
        matches!(self.backing, Backing::Mmap(_))
    }

    /// Consumes the mapping, keeping only the labels.
    pub fn into_labels(self) -> Labels {
        self.labels
    }
}
