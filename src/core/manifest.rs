//! Manifest fetching, parsing, and file-list generation.
//!
//! Manifests are line-oriented and loosely versioned. Version 2 maps
//! logical server paths to stream directories and splits every archive
//! into numbered chunks; version 3 and later carry `tag=` lines and name
//! each file directly. Version 1 predates the grammar this module speaks
//! and is refused outright.

use std::collections::HashMap;
use std::path::Path;

use reqwest::{header, Client};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::repo::{RepoKind, Repository, MIRRORS};
use crate::session::Session;

/// Streamed archives are always published in this many chunks.
const CHUNK_PARTS: u32 = 30;

/// How many lines after a file marker its tokens may trail.
const TOKEN_LOOKAHEAD: usize = 5;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("no mirror returned a usable manifest for {0}")]
    NoManifest(String),

    #[error("manifest version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("malformed version tag {0:?}")]
    BadVersionTag(String),
}

/// One downloadable file derived from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Fully qualified download URL
    pub url: String,
    /// Path relative to the install directory
    pub path: String,
    /// Content group the file belongs to, e.g. `base` or a locale tag
    pub info: String,
    /// Size advertised by the manifest, when present. Display only; the
    /// transfer is verified against the server's reported length instead.
    pub size: Option<u64>,
}

/// A parsed manifest, pinned to the mirror it was fetched from.
#[derive(Debug)]
pub struct Manifest {
    version: u32,
    lines: Vec<String>,
    server_paths: HashMap<String, String>,
    name: String,
}

impl Manifest {
    /// Fetch the repository's manifest, trying each well-known mirror in
    /// order. The first mirror that answers is bound to `repo` so every
    /// later download uses the same host.
    pub async fn fetch(client: &Client, repo: &mut Repository) -> Result<Self, ManifestError> {
        Self::fetch_from(client, repo, &MIRRORS).await
    }

    /// Like [`Manifest::fetch`], but with an explicit mirror list.
    pub async fn fetch_from(
        client: &Client,
        repo: &mut Repository,
        mirrors: &[&str],
    ) -> Result<Self, ManifestError> {
        for mirror in mirrors.iter().copied() {
            let url = repo.manifest_url_on(mirror);
            debug!(%url, "requesting manifest");
            let body = match fetch_text(client, &url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(mirror, error = %err, "mirror failed");
                    continue;
                }
            };
            repo.bind_mirror(mirror);
            let manifest = match Self::parse(&body, &repo.base_url(), repo.manifest_name()) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!(mirror, error = %err, "mirror served an unreadable manifest");
                    continue;
                }
            };
            if manifest.version == 1 {
                return Err(ManifestError::UnsupportedVersion(1));
            }
            info!(mirror, version = manifest.version, "manifest loaded");
            return Ok(manifest);
        }
        Err(ManifestError::NoManifest(repo.manifest_name().to_string()))
    }

    /// Parse manifest text. `file=` lines are rewritten against the bound
    /// base URL, which is what later marks them as file markers.
    fn parse(text: &str, base_url: &str, name: &str) -> Result<Self, ManifestError> {
        let lines: Vec<String> = text
            .lines()
            .map(|line| {
                let line = line.trim();
                match line.strip_prefix("file=") {
                    Some(rest) => format!("{base_url}{rest}"),
                    None => line.to_string(),
                }
            })
            .collect();

        let mut version = 0;
        let mut server_paths = HashMap::new();
        for i in 0..lines.len() {
            if let Some(rest) = lines[i].strip_prefix("version=") {
                version = rest
                    .trim()
                    .parse()
                    .map_err(|_| ManifestError::BadVersionTag(rest.to_string()))?;
            } else if let Some(key) = lines[i].strip_prefix("serverpath=") {
                if let Some(value) = lines.get(i + 1).and_then(|l| l.strip_prefix("path=")) {
                    server_paths.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            version,
            lines,
            server_paths,
            name: name.to_string(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Locales the manifest offers, sorted and deduplicated. Version 2
    /// derives them from `locale_*` server path keys; version 3 and later
    /// list them as `tag=` lines next to the content tags. Versions before
    /// 2 carry no locale information at all.
    pub fn locales(&self) -> Option<Vec<String>> {
        if self.version <= 1 {
            return None;
        }
        let mut tags: Vec<String> = if self.version == 2 {
            self.server_paths
                .keys()
                .filter_map(|key| key.strip_prefix("locale_"))
                .map(str::to_string)
                .collect()
        } else {
            const CONTENT_TAGS: [&str; 8] =
                ["base", "OSX", "Win", "ALT", "EXP1", "EXP2", "EXP3", "EXP4"];
            self.lines
                .iter()
                .filter_map(|line| line.strip_prefix("tag="))
                .filter(|tag| !CONTENT_TAGS.contains(tag))
                .map(str::to_string)
                .collect()
        };
        tags.sort();
        tags.dedup();
        Some(tags)
    }

    /// Expand the manifest into the files this session still needs.
    ///
    /// Walks every file marker, resolves its trailing tokens, expands
    /// streamed archives into their numbered chunks, appends the manifest
    /// itself, and finally filters the list against the session's locale,
    /// OS, and completed set. Markers missing their tokens are dropped,
    /// as are streamed markers whose server path key is unmapped.
    pub fn generate_file_list(
        &self,
        repo: &Repository,
        session: &mut Session,
        checkpoint: &Path,
        install_dir: &Path,
    ) -> Vec<FileEntry> {
        let base_url = repo.base_url();
        let mut entries = Vec::new();

        for (i, line) in self.lines.iter().enumerate() {
            if !is_file_marker(line, &base_url) {
                continue;
            }
            let path_token = self.token_after(i, "path=", &base_url);
            let name_token = self.token_after(i, "name=", &base_url);
            let size = self
                .token_after(i, "size=", &base_url)
                .and_then(|s| s.parse().ok());
            let (Some(path_token), Some(name_token)) = (path_token, name_token) else {
                debug!(marker = %line, "incomplete file block, skipping");
                continue;
            };

            let info = path_token
                .strip_prefix("locale_")
                .unwrap_or(&path_token)
                .to_string();
            let local_path = if self.version == 2 {
                line.get(base_url.len()..).unwrap_or("").to_string()
            } else {
                name_token.clone()
            };

            if repo.kind == RepoKind::Direct {
                entries.push(FileEntry {
                    url: line.clone(),
                    path: local_path,
                    info,
                    size,
                });
                continue;
            }

            let Some(stream_dir) = self.server_paths.get(&path_token) else {
                debug!(marker = %line, token = %path_token, "no server path mapping, skipping");
                continue;
            };
            let stream_url = format!("{base_url}{stream_dir}/{name_token}");
            for part in 0..CHUNK_PARTS {
                entries.push(FileEntry {
                    url: format!("{stream_url}.{part}"),
                    path: format!("{local_path}.{part}"),
                    info: info.clone(),
                    size: None,
                });
            }
        }

        // The manifest travels with the restored client so later patches
        // can be resolved against it. Direct repositories get a placeholder
        // name the filter rejects.
        let manifest_path = if repo.kind == RepoKind::Direct {
            ".mfil.".to_string()
        } else {
            self.name.clone()
        };
        entries.push(FileEntry {
            url: format!("{base_url}{}", self.name),
            path: manifest_path,
            info: String::new(),
            size: None,
        });

        entries.retain(|entry| accepts(entry, session, checkpoint, install_dir));
        entries
    }

    /// Find `token` on one of the next few lines after a marker. The scan
    /// stops early at the next file marker or the end of the manifest.
    fn token_after(&self, index: usize, token: &str, base_url: &str) -> Option<String> {
        for offset in 1..=TOKEN_LOOKAHEAD {
            let line = self.lines.get(index + offset)?;
            if is_file_marker(line, base_url) {
                return None;
            }
            if let Some(rest) = line.strip_prefix(token) {
                return Some(rest.to_string());
            }
        }
        None
    }
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    let response = client
        .get(url)
        .header(header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?;
    response.text().await
}

/// A file marker is a line that starts with the bound base URL and has a
/// three-character extension, i.e. a dot four characters from the end.
fn is_file_marker(line: &str, base_url: &str) -> bool {
    line.len() >= 4
        && line.len() > base_url.len()
        && line
            .get(..base_url.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(base_url))
        && line.as_bytes()[line.len() - 4] == b'.'
}

/// Decide whether one entry belongs in this session's download list.
/// Rules apply in order and every string comparison ignores case.
fn accepts(entry: &FileEntry, session: &mut Session, checkpoint: &Path, install_dir: &Path) -> bool {
    if session.completed.contains(&entry.path) {
        if install_dir.join(&entry.path).exists() {
            debug!(file = %entry.path, "already restored, skipping");
            return false;
        }
        // Checkpointed but gone from disk: put it back in the queue.
        session.completed.remove(&entry.path);
        if let Err(err) = session.save(checkpoint) {
            warn!(error = %err, "could not update the checkpoint");
        }
    }

    if entry.path.trim().is_empty() {
        return false;
    }
    if ends_with_ignore_case(&entry.path, "mfil") {
        return true;
    }

    let filename = entry.path.rsplit('/').next().unwrap_or("");
    let dir = &entry.path[..entry.path.len() - filename.len()];

    if dir.eq_ignore_ascii_case("Updates/") {
        return contains_ignore_case(filename, &session.os);
    }
    if starts_with_ignore_case(filename, "alternate.MPQ")
        && !entry.info.eq_ignore_ascii_case(&session.locale)
    {
        return false;
    }
    if dir.eq_ignore_ascii_case("Data/") {
        return true;
    }
    if starts_with_ignore_case(dir, "Data/Interface/") {
        return true;
    }
    if starts_with_ignore_case(dir, &format!("Data/{}", session.locale)) {
        return true;
    }
    false
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.get(s.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
