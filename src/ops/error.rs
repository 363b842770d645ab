//! Domain-specific errors for restore operations

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Archive operation failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing to write outside the install directory: {0}")]
    UnsafePath(String),

    #[error("Base archive not found: {}", .0.display())]
    MissingBaseArchive(PathBuf),

    #[error("No usable file list in {}, manual extraction required", .0.display())]
    NoFileList(PathBuf),

    #[error("Could not clear scratch directory {}: {source}", .path.display())]
    ScratchCleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}
