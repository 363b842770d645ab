//! mfil - legacy client restoration
//!
//! Restores a playable legacy game client from a remote, versioned `.mfil`
//! manifest: the operator picks a repository build, the tool downloads the
//! file set for a chosen locale/OS, then extracts or rebuilds the archive
//! containers on disk.
//!
//! # Architecture
//!
//! - **Explicit session threading**: the checkpoint [`session::Session`] is
//!   passed as a parameter through manifest filtering, downloading, and
//!   installation. There is no process-wide current session.
//! - **Progress sink**: long-running operations report through
//!   [`ui::ProgressSink`], keeping the core decoupled from the terminal.
//! - **Archive engine seam**: archive container access goes through the
//!   [`archive::ArchiveEngine`] trait; native bindings live in one module.
//!
//! # Directory layout
//!
//! ```text
//! ./
//! ├── session.toml        # resume checkpoint (deleted on success)
//! └── <build>patch<ver>/  # install directory, e.g. 15595patch4.3.4/
//!     ├── Data/           # downloaded archives and chunks
//!     └── Updates/        # per-file patch archives (direct mode)
//! ```

pub mod archive;
pub mod core;
pub mod io;
pub mod ops;
pub mod session;
pub mod ui;

// Re-exports for convenience
pub use crate::core::manifest;
pub use crate::core::repo;

use std::path::PathBuf;

/// Session checkpoint location, relative to the working directory.
pub fn session_path() -> PathBuf {
    PathBuf::from("session.toml")
}

/// Extract the filename from a URL.
///
/// # Example
///
/// ```
/// use mfil::filename_from_url;
///
/// assert_eq!(filename_from_url("http://example.com/eu/wow-15595-x.mfil"), "wow-15595-x.mfil");
/// assert_eq!(filename_from_url(""), "");
/// ```
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// User Agent string
pub const USER_AGENT: &str = concat!("mfil/", env!("CARGO_PKG_VERSION"));
