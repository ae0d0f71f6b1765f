use std::path::PathBuf;
use thiserror::Error;

/// Failures that end a scan.
///
/// Per-image problems (undecodable files, failed extraction) never show up
/// here; they are logged and the image is left out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Cannot access directory {path}: {reason}")]
    DirectoryAccess { path: PathBuf, reason: String },

    #[error("Scan superseded by a newer scan")]
    Superseded,
}

impl ScanError {
    pub(crate) fn directory_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ScanError::DirectoryAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
