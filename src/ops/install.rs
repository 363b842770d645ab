//! Turning downloaded payloads into a playable client.
//!
//! Direct repositories ship a complete client inside one base archive per
//! OS; installation extracts it and hands any patch archives to the game's
//! own updater. Streamed repositories ship archives split into numbered
//! chunks that only the background downloader understands; installation
//! consolidates each chunk group into a flat archive the client can read.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{ArchiveEngine, ArchiveVersion, OpenMode};
use crate::ops::RestoreError;
use crate::session::Session;
use crate::ui::{Progress, ProgressSink};

/// Consolidated archives are flushed after this many entries.
const FLUSH_INTERVAL: usize = 10_000;

/// Directory incremental-patch entries are staged through.
const SCRATCH_DIR: &str = "Temp";

/// Executable expected to apply flat-file patch archives.
const UPDATER_EXE: &str = "BNUpdate.exe";

/// Tally of one rebuild pass over the chunked archive groups.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub rebuilt: usize,
    /// Groups already recorded in the checkpoint.
    pub skipped: usize,
    /// Groups whose first chunk had no usable file list.
    pub unlisted: usize,
    /// Groups missing their `.0` chunk.
    pub incomplete: usize,
}

pub struct Installer<'a, E> {
    engine: &'a E,
    install_dir: &'a Path,
    session_path: &'a Path,
    os: &'a str,
    sink: &'a dyn ProgressSink,
}

impl<'a, E: ArchiveEngine> Installer<'a, E> {
    pub fn new(
        engine: &'a E,
        install_dir: &'a Path,
        session_path: &'a Path,
        os: &'a str,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            engine,
            install_dir,
            session_path,
            os,
            sink,
        }
    }

    /// Extract the OS base archive into the install root. Returns the
    /// number of files extracted.
    pub fn install_direct(&self) -> Result<usize, RestoreError> {
        let base_name = format!("Base-{}.mpq", self.os);
        let base_path = self.install_dir.join("Data").join(&base_name);
        if !base_path.exists() {
            return Err(RestoreError::MissingBaseArchive(base_path));
        }

        info!(archive = %base_name, "extracting base archive");
        let archive = self.engine.open(&base_path, OpenMode::ReadOnly)?;
        let mut names = archive.file_list()?.unwrap_or_default();
        names.retain(|name| !name.ends_with(".lst"));
        if names.is_empty() {
            return Err(RestoreError::NoFileList(base_path));
        }

        for name in &names {
            let dest = self.install_dir.join(name.replace('\\', "/"));
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            archive.extract(name, &dest)?;
            debug!(file = %name, "extracted");
        }
        info!(files = names.len(), "base archive extracted");
        Ok(names.len())
    }

    /// Hand every patch archive under Updates/ to the game's updater in a
    /// single `--patchlist` argument. The child is not awaited.
    pub fn apply_updates(&self) -> Result<Vec<String>, RestoreError> {
        let updates_dir = self.install_dir.join("Updates");
        if !updates_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        for dir_entry in std::fs::read_dir(&updates_dir)? {
            let name = dir_entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mpq"))
            {
                archives.push(format!("Updates/{name}"));
            }
        }
        if archives.is_empty() {
            return Ok(archives);
        }
        archives.sort();

        let args = updater_args(&archives);
        let updater = self.install_dir.join(UPDATER_EXE);
        info!(updates = archives.len(), "handing patch archives to the updater");
        if let Err(err) = Command::new(&updater)
            .args(&args)
            .current_dir(self.install_dir)
            .spawn()
        {
            warn!(
                updater = %updater.display(),
                error = %err,
                "could not launch the updater, run it by hand: {UPDATER_EXE} {}",
                args.join(" ")
            );
        }
        Ok(archives)
    }

    /// Consolidate every chunked archive group under Data/ into a flat
    /// archive, checkpointing each finished group.
    pub fn rebuild_streamed(&self, session: &mut Session) -> Result<RebuildReport, RestoreError> {
        let data_dir = self.install_dir.join("Data");
        let groups = discover_groups(&data_dir);
        info!(groups = groups.len(), "rebuilding chunked archives");

        let mut report = RebuildReport::default();
        for (consolidated, parts) in &groups {
            let key = self.relative_key(consolidated);
            if session.completed.contains(&key) {
                debug!(archive = %key, "already consolidated");
                report.skipped += 1;
                continue;
            }
            if !parts.contains(&0) {
                warn!(archive = %key, "first chunk missing, leaving group for a later run");
                report.incomplete += 1;
                continue;
            }
            if self.rebuild_group(consolidated)? {
                session.complete(&key, self.session_path);
                report.rebuilt += 1;
            } else {
                report.unlisted += 1;
            }
        }
        Ok(report)
    }

    /// Move every entry of one chunk group into a flat archive. Returns
    /// false when the group had no usable file list and was left alone.
    fn rebuild_group(&self, consolidated: &Path) -> Result<bool, RestoreError> {
        let mut part0 = consolidated.as_os_str().to_os_string();
        part0.push(".0");
        let part0 = PathBuf::from(part0);

        // Stale output from an interrupted run.
        remove_if_exists(consolidated)?;

        let scratch = self.install_dir.join(SCRATCH_DIR);
        std::fs::create_dir_all(&scratch)?;

        let label = consolidated
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| consolidated.display().to_string());

        let source = self.engine.open(&part0, OpenMode::Fragmented)?;
        let dest = self.engine.create(consolidated, ArchiveVersion::V3)?;

        let names = match source.file_list()? {
            Some(names) if !names.is_empty() => names,
            _ => {
                drop(dest);
                remove_if_exists(consolidated)?;
                self.remove_scratch(&scratch)?;
                warn!(archive = %label, "no file list in first chunk, leaving group as-is");
                return Ok(false);
            }
        };

        let total = names.len();
        for (index, name) in names.iter().enumerate() {
            let mut entry = source.open_entry(name)?;
            if entry.flags().is_patch() {
                // The engine cannot stream incremental-patch entries; stage
                // them on disk and re-add with their original flags.
                let flags = entry.flags();
                drop(entry);
                let staged = scratch.join(name.replace('\\', "/"));
                if let Some(parent) = staged.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                source.extract(name, &staged)?;
                dest.add_from_disk(&staged, name, flags)?;
            } else {
                dest.add_from_stream(&mut *entry)?;
            }

            let done = index + 1;
            self.sink.update(Progress::Rebuild {
                archive: label.clone(),
                done,
                total,
            });
            if done % FLUSH_INTERVAL == 0 {
                dest.flush()?;
            }
        }
        dest.flush()?;

        drop(source);
        drop(dest);
        self.remove_scratch(&scratch)?;
        info!(archive = %label, entries = total, "archive consolidated");
        Ok(true)
    }

    fn relative_key(&self, path: &Path) -> String {
        let rel = path.strip_prefix(self.install_dir).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }

    /// Remove the staging directory, retrying once after a short delay.
    fn remove_scratch(&self, scratch: &Path) -> Result<(), RestoreError> {
        match std::fs::remove_dir_all(scratch) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                debug!(error = %err, "scratch removal failed, retrying");
                std::thread::sleep(Duration::from_millis(50));
                std::fs::remove_dir_all(scratch).map_err(|source| RestoreError::ScratchCleanup {
                    path: scratch.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// The updater takes the whole patch list as one argument.
fn updater_args(archives: &[String]) -> Vec<String> {
    vec![
        "--skippostlaunch=1".to_string(),
        format!("--patchlist={}", archives.join(" ")),
    ]
}

/// Find chunk groups under `data_dir`: files whose final extension is a
/// bare number and whose remaining name ends in `.mpq`, keyed by the
/// consolidated path the group rebuilds into.
fn discover_groups(data_dir: &Path) -> BTreeMap<PathBuf, Vec<u32>> {
    let mut groups: BTreeMap<PathBuf, Vec<u32>> = BTreeMap::new();
    if !data_dir.is_dir() {
        return groups;
    }
    for dir_entry in WalkDir::new(data_dir).into_iter().flatten() {
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let path = dir_entry.path();
        let Some(part) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse::<u32>().ok())
        else {
            continue;
        };
        let stem = path.with_extension("");
        if !stem
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mpq"))
        {
            continue;
        }
        groups.entry(stem).or_default().push(part);
    }
    for parts in groups.values_mut() {
        parts.sort_unstable();
    }
    groups
}

fn remove_if_exists(path: &Path) -> Result<(), RestoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale file");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
