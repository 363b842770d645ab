//! Archive container access.
//!
//! The restore flow opens chunked container fragments, lists their embedded
//! files, and writes consolidated archives. Everything container-specific
//! sits behind [`ArchiveEngine`], so installation logic never touches the
//! native library directly and tests can swap in an in-memory engine.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(test)]
pub mod mock;
pub mod storm;

pub use storm::StormEngine;

/// Name of the embedded file every well-formed archive uses to list its
/// own contents.
pub const LISTFILE_NAME: &str = "(listfile)";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("could not open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not create archive {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("entry {0:?} not found in archive")]
    EntryNotFound(String),

    #[error("{op} failed: {source}")]
    Native {
        op: &'static str,
        source: std::io::Error,
    },

    #[error("archive engine library unavailable: {0}")]
    EngineUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How an existing archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// The archive is the first of several numbered fragments and may be
    /// missing trailing blocks.
    Fragmented,
}

/// Container format revision for newly created archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveVersion {
    /// Modern revision with large-archive support
    V3,
}

/// Raw entry flag bits as stored in the container's block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(pub u32);

impl EntryFlags {
    /// Entry data is compressed
    pub const COMPRESSED: u32 = 0x0000_0200;
    /// Entry is an incremental patch fragment
    pub const PATCH: u32 = 0x0010_0000;

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub fn is_patch(self) -> bool {
        self.0 & Self::PATCH != 0
    }
}

/// Factory for archive handles.
pub trait ArchiveEngine {
    /// Open an existing archive.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn Archive + '_>, ArchiveError>;

    /// Create an empty archive, replacing any file already at `path`.
    fn create(
        &self,
        path: &Path,
        version: ArchiveVersion,
    ) -> Result<Box<dyn Archive + '_>, ArchiveError>;
}

/// One open archive. Entry streams address their archive through opaque
/// ids handed out by [`Archive::open_entry`], never through back-pointers.
pub trait Archive: std::fmt::Debug {
    /// Names of the embedded files, or `None` when the archive carries no
    /// usable list.
    fn file_list(&self) -> Result<Option<Vec<String>>, ArchiveError>;

    /// Extract one entry to a filesystem path.
    fn extract(&self, name: &str, dest: &Path) -> Result<(), ArchiveError>;

    /// Open one entry for streaming reads.
    fn open_entry<'a>(&'a self, name: &str) -> Result<Box<dyn EntryStream + 'a>, ArchiveError>;

    /// Add an entry from a file on disk, preserving the given flags.
    fn add_from_disk(&self, src: &Path, name: &str, flags: EntryFlags) -> Result<(), ArchiveError>;

    /// Add an entry by draining another archive's entry stream.
    fn add_from_stream(&self, entry: &mut dyn EntryStream) -> Result<(), ArchiveError>;

    /// Push buffered table and data writes to stable storage.
    fn flush(&self) -> Result<(), ArchiveError>;
}

/// Readable handle to one embedded file.
pub trait EntryStream: Read {
    /// Entry name inside the archive
    fn name(&self) -> &str;

    /// Raw flag bits from the block table
    fn flags(&self) -> EntryFlags;

    /// Uncompressed length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_flags() {
        assert!(EntryFlags(EntryFlags::COMPRESSED).is_compressed());
        assert!(!EntryFlags(EntryFlags::COMPRESSED).is_patch());
        assert!(EntryFlags(EntryFlags::PATCH | EntryFlags::COMPRESSED).is_patch());
        assert!(!EntryFlags::default().is_compressed());
    }
}
