use std::cell::Cell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::labels::Labels;
use crate::lock::DirLock;
use crate::persisted::{LabelledMap, StorageError};
use crate::write::{is_tmp_name, write_labelled_atomic};

/// Prefix of every document filename.
pub const FILE_PREFIX: &str = "doc-";

/// A bound storage directory of labelled documents.
///
/// The directory is locked for the lifetime of the binding. Dropping the value
/// unbinds it.
#[derive(Debug)]
pub struct StorageDir {
    root: PathBuf,
    max_files: usize,
    /// Sequence for the next filename; `None` once `u64::MAX` has been used.
    next_seq: Cell<Option<u64>>,
    /// Documents present, counted at bind and kept up to date by this binding.
    n_files: Cell<usize>,
    _lock: DirLock,
}

impl StorageDir {
    /// Binds `path`, creating it (private to the current user) if absent.
    ///
    /// `max_files` bounds the number of documents the directory may hold;
    /// `0` disables the bound.
    pub fn bind(path: impl AsRef<Path>, max_files: usize) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            fs::set_permissions(&root, fs::Permissions::from_mode(0o700))?;
        }

        let lock = DirLock::try_lock(&root)?;
        let dir = Self {
            root,
            max_files,
            next_seq: Cell::new(Some(1)),
            n_files: Cell::new(0),
            _lock: lock,
        };

        let names = dir.list()?;
        dir.n_files.set(names.len());
        if let Some(last_seq) = names.iter().filter_map(|name| parse_seq(name)).max() {
            dir.next_seq.set(last_seq.checked_add(1));
        }

        tracing::debug!(
            target = "conscache.storage",
            path = %dir.root.display(),
            max_files,
            n_files = names.len(),
            next_seq = ?dir.next_seq.get(),
            "bound storage directory"
        );
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Lists document filenames in creation order.
    ///
    /// Hidden files are skipped. Temp files left behind by interrupted writes
    /// are removed best-effort.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(
                        target = "conscache.storage",
                        dir = %self.root.display(),
                        error = %err,
                        "failed to read storage directory entry"
                    );
                    continue;
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };

            if is_tmp_name(&name) {
                remove_file_best_effort(&entry.path(), "list.stale_tmp");
                continue;
            }
            if name.starts_with('.') {
                continue;
            }

            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => names.push(name),
                Ok(_) => {}
                Err(err) => {
                    // Entries can race with deletion; only log unexpected errors.
                    if err.kind() != io::ErrorKind::NotFound {
                        tracing::debug!(
                            target = "conscache.storage",
                            path = %entry.path().display(),
                            error = %err,
                            "failed to read storage entry file type"
                        );
                    }
                }
            }
        }

        names.sort_by(|a, b| {
            let a_key = (parse_seq(a).unwrap_or(u64::MAX), a);
            let b_key = (parse_seq(b).unwrap_or(u64::MAX), b);
            a_key.cmp(&b_key)
        });
        Ok(names)
    }

    /// Number of documents in the directory, as tracked by this binding.
    pub fn n_files(&self) -> usize {
        self.n_files.get()
    }

    /// Persists `body` under a fresh filename carrying `labels`, returning the
    /// filename.
    pub fn save_labelled(&self, labels: &Labels, body: &[u8]) -> Result<String, StorageError> {
        if self.max_files > 0 && self.n_files() >= self.max_files {
            return Err(StorageError::Full {
                max_files: self.max_files,
            });
        }

        loop {
            let seq = self.next_seq.get().ok_or(StorageError::SequenceExhausted)?;
            self.next_seq.set(seq.checked_add(1));

            let name = format!("{FILE_PREFIX}{seq:010}");
            let path = self.root.join(&name);
            if fs::symlink_metadata(&path).is_ok() {
                continue;
            }

            write_labelled_atomic(&path, labels, body)?;
            self.n_files.set(self.n_files.get() + 1);
            tracing::trace!(
                target = "conscache.storage",
                filename = %name,
                labels = labels.len(),
                body_len = body.len(),
                "saved labelled document"
            );
            return Ok(name);
        }
    }

    /// Maps the document `name`, decoding its labels and locating its body.
    pub fn map_labelled(&self, name: &str) -> Result<LabelledMap, StorageError> {
        let path = self.document_path(name)?;
        LabelledMap::open(&path)
    }

    /// Deletes the document `name`. A missing file is not an error.
    pub fn remove_file(&self, name: &str) -> Result<(), StorageError> {
        let path = self.document_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.n_files.set(self.n_files.get().saturating_sub(1));
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn document_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_document_name(name) {
            return Err(StorageError::InvalidFilename(name.to_owned()));
        }
        Ok(self.root.join(name))
    }
}

fn is_document_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

fn parse_seq(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?.parse().ok()
}

fn remove_file_best_effort(path: &Path, reason: &'static str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target = "conscache.storage",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove file"
            );
        }
    }
}
