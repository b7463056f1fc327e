//! Lookup and removal of individual files in the download directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::security::is_safe_file_name;

#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("File not found")]
    NotFound,
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Returns the path of `name` inside `dir` when it is a regular file.
///
/// Names that would escape the directory are reported as missing.
pub fn resolve_file(dir: &Path, name: &str) -> Result<PathBuf, FileAccessError> {
    if !is_safe_file_name(name) {
        return Err(FileAccessError::NotFound);
    }
    let path = dir.join(name);
    match fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => Ok(path),
        _ => Err(FileAccessError::NotFound),
    }
}

/// Removes `name` from `dir`. Missing files are left untouched and reported
/// as [`FileAccessError::NotFound`]; any other failure carries the I/O error.
pub fn delete_file(dir: &Path, name: &str) -> Result<PathBuf, FileAccessError> {
    if !is_safe_file_name(name) {
        return Err(FileAccessError::NotFound);
    }
    let path = dir.join(name);
    match fs::symlink_metadata(&path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FileAccessError::NotFound);
        }
        Err(err) => return Err(err.into()),
    }

    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "deleted file");
            Ok(path)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(FileAccessError::NotFound),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "delete failed");
            Err(err.into())
        }
    }
}
