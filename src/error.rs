//! Error types for the photo index

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// The taken-time document or a config file could not be (de)serialized
    Serialization,
    /// The extraction worker pool could not be started
    ThreadPool,
    /// Path is not usable as a photo root or key
    InvalidPath,
}

/// Represents an error raised by the index
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct IndexError {
    /// The kind of error
    pub kind: IndexErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl IndexError {
    /// Create a new index error
    pub fn new(kind: IndexErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            IndexErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::IoError, path, message)
    }

    /// Create a serialization error
    pub fn serialization(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Serialization, path, message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::InvalidPath, Some(path), message)
    }

    /// Attach a path to an error that was converted without one
    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => IndexErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => IndexErrorKind::NotFound,
            _ => IndexErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(None, err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for IndexError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::new(IndexErrorKind::ThreadPool, None, err.to_string())
    }
}
