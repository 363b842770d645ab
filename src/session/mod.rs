//! Session checkpoint for resumable restores.
//!
//! A restore writes `session.toml` next to where it was started. The file
//! records the chosen repository, locale, and OS, plus every path that has
//! already been fully restored, so an interrupted run can pick up where it
//! stopped. The checkpoint is deleted once the restore completes.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Paths a run has fully restored. Membership ignores case; insertion
/// order and the original casing are preserved for the checkpoint file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CompletedSet {
    paths: Vec<String>,
    index: HashSet<String>,
}

impl CompletedSet {
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(&path.to_ascii_lowercase())
    }

    /// Returns true when the path was not already present.
    pub fn insert(&mut self, path: &str) -> bool {
        if self.index.insert(path.to_ascii_lowercase()) {
            self.paths.push(path.to_string());
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, path: &str) -> bool {
        if self.index.remove(&path.to_ascii_lowercase()) {
            self.paths.retain(|p| !p.eq_ignore_ascii_case(path));
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for CompletedSet {
    fn from(paths: Vec<String>) -> Self {
        let mut set = Self::default();
        for path in paths {
            set.insert(&path);
        }
        set
    }
}

impl From<CompletedSet> for Vec<String> {
    fn from(set: CompletedSet) -> Self {
        set.paths
    }
}

/// One restore in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Manifest filename identifying the repository build
    pub manifest: String,
    pub locale: String,
    pub os: String,
    /// Whether chunked archives should be rebuilt after downloading.
    /// Remembered so resuming never asks twice.
    #[serde(default)]
    pub repack_archives: bool,
    pub created_at: String,
    #[serde(default)]
    pub completed: CompletedSet,
}

impl Session {
    pub fn new(manifest: &str, locale: &str, os: &str) -> Self {
        Self {
            manifest: manifest.to_string(),
            locale: locale.to_string(),
            os: os.to_string(),
            repack_archives: false,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed: CompletedSet::default(),
        }
    }

    /// Load the checkpoint if one exists. A missing file means no restore
    /// is in progress; an unreadable file is an error the caller surfaces.
    pub fn load(path: &Path) -> Result<Option<Self>, SessionError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn delete(path: &Path) -> Result<(), SessionError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Record one finished path and persist the checkpoint. Losing a
    /// checkpoint write only costs a re-download, so failures are logged
    /// rather than returned.
    pub fn complete(&mut self, path: &str, checkpoint: &Path) {
        if self.completed.insert(path) {
            if let Err(err) = self.save(checkpoint) {
                warn!(error = %err, "could not persist checkpoint");
            }
        }
    }
}
