use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(unix)]
use std::sync::OnceLock;

use crate::header::StorageHeader;
use crate::labels::{encode_labels, Labels};
use crate::persisted::StorageError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker embedded in temporary file names; see [`is_tmp_name`].
pub(crate) const TMP_MARKER: &str = ".tmp.";

/// Atomically writes a labelled document to `path`.
///
/// The document is written to a hidden temp file next to `path`, synced, and
/// renamed into place, so readers never observe a partially written file.
pub fn write_labelled_atomic(
    path: &Path,
    labels: &Labels,
    body: &[u8],
) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or(StorageError::InvalidHeader("missing parent directory"))?;
    fs::create_dir_all(parent)?;

    let label_block = encode_labels(labels)?;
    let header = StorageHeader::new(label_block.len() as u64, body.len() as u64);

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;

    let result = (|| -> Result<(), StorageError> {
        file.write_all(&header.encode())?;
        file.write_all(&label_block)?;
        file.write_all(body)?;
        file.sync_all()?;
        Ok(())
    })();
    drop(file);

    let result = result.and_then(|()| fs::rename(&tmp_path, path).map_err(StorageError::from));
    if let Err(err) = result {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "conscache.storage",
                    path = %tmp_path.display(),
                    error = %remove_err,
                    "failed to remove temporary file after write failure"
                );
            }
        }
        return Err(err);
    }

    sync_dir_best_effort(parent, "write_labelled_atomic.sync_parent_dir");
    Ok(())
}

/// Returns true for names produced by [`open_unique_tmp_file`].
pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TMP_MARKER)
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(format!("{TMP_MARKER}{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn sync_dir_best_effort(dir: &Path, reason: &'static str) {
    #[cfg(unix)]
    static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    #[cfg(unix)]
    {
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "conscache.storage",
                        dir = %dir.display(),
                        reason,
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (dir, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_leaves_no_temp_files_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc-0000000001");
        write_labelled_atomic(&path, &Labels::new(), b"body").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["doc-0000000001"]);
    }

    #[test]
    fn tmp_names_are_hidden() {
        assert!(is_tmp_name(".doc-0000000001.tmp.42.0"));
        assert!(!is_tmp_name("doc-0000000001"));
        assert!(!is_tmp_name(".lock"));
    }
}
