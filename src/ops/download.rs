//! Sequential transfer of manifest entries with checkpointing.
//!
//! Files move one at a time, in manifest order. Each completed file is
//! written to the session checkpoint before the next one starts, so an
//! interrupted run loses at most the file that was in flight.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::io::download;
use crate::manifest::FileEntry;
use crate::ops::RestoreError;
use crate::session::Session;
use crate::ui::ProgressSink;

/// Pause before the one-shot retry of a failed transfer.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// What happened to a single manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Missing,
    Abandoned,
}

/// Tally of one download pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub completed: usize,
    pub missing: usize,
    pub abandoned: Vec<String>,
}

impl DownloadReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

pub struct Downloader<'a> {
    client: &'a Client,
    install_dir: &'a Path,
    session_path: &'a Path,
    sink: &'a dyn ProgressSink,
    retry_pause: Duration,
}

impl<'a> Downloader<'a> {
    pub fn new(
        client: &'a Client,
        install_dir: &'a Path,
        session_path: &'a Path,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            client,
            install_dir,
            session_path,
            sink,
            retry_pause: RETRY_PAUSE,
        }
    }

    #[cfg(test)]
    fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Work through `entries` in order, updating `session` as files land.
    pub async fn run(
        &self,
        entries: &[FileEntry],
        session: &mut Session,
    ) -> Result<DownloadReport, RestoreError> {
        let mut report = DownloadReport::default();
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            debug!(file = index + 1, total, path = %entry.path, "starting transfer");
            match self.transfer(entry).await? {
                Outcome::Completed => {
                    report.completed += 1;
                    session.complete(&entry.path, self.session_path);
                }
                Outcome::Missing => {
                    // The mirror genuinely lacks the file. Remember it so
                    // the next run does not ask for it again.
                    report.missing += 1;
                    session.complete(&entry.path, self.session_path);
                }
                Outcome::Abandoned => {
                    report.abandoned.push(entry.path.clone());
                }
            }
        }

        info!(
            completed = report.completed,
            missing = report.missing,
            abandoned = report.abandoned.len(),
            "download pass finished"
        );
        Ok(report)
    }

    async fn transfer(&self, entry: &FileEntry) -> Result<Outcome, RestoreError> {
        let dest = self.prepare(&entry.path)?;

        match download::fetch(self.client, &entry.url, &dest, &entry.path, self.sink).await {
            Ok(_) => return Ok(Outcome::Completed),
            Err(err) if err.is_not_found() => {
                warn!(path = %entry.path, "not present on the mirror, skipping");
                return Ok(Outcome::Missing);
            }
            Err(err) => {
                warn!(path = %entry.path, error = %err, "transfer failed, retrying once");
            }
        }

        tokio::time::sleep(self.retry_pause).await;

        match download::fetch(self.client, &entry.url, &dest, &entry.path, self.sink).await {
            Ok(_) => Ok(Outcome::Completed),
            Err(err) if err.is_not_found() => {
                warn!(path = %entry.path, "not present on the mirror, skipping");
                Ok(Outcome::Missing)
            }
            Err(err) => {
                warn!(path = %entry.path, error = %err, "retry failed, abandoning file");
                Ok(Outcome::Abandoned)
            }
        }
    }

    /// Resolve the destination, make room for it, and clear any previous copy.
    fn prepare(&self, rel: &str) -> Result<PathBuf, RestoreError> {
        let rel_path = Path::new(rel);
        let safe = !rel_path.is_absolute()
            && rel_path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(RestoreError::UnsafePath(rel.to_string()));
        }

        let dest = self.install_dir.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&dest) {
            Ok(()) => debug!(path = %dest.display(), "replaced previous copy"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::NullSink;

    fn entry(server: &mockito::ServerGuard, path: &str) -> FileEntry {
        FileEntry {
            url: format!("{}/{path}", server.url()),
            path: path.to_string(),
            info: "base".to_string(),
            size: None,
        }
    }

    fn downloader<'a>(
        client: &'a Client,
        dir: &'a Path,
        session_path: &'a Path,
        sink: &'a NullSink,
    ) -> Downloader<'a> {
        Downloader::new(client, dir, session_path, sink).with_retry_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_run_downloads_files_and_checkpoints_each() {
        let mut server = mockito::Server::new_async().await;
        let m1 = server
            .mock("GET", "/Data/a.txt")
            .with_body("alpha")
            .create_async()
            .await;
        let m2 = server
            .mock("GET", "/Data/b.txt")
            .with_body("bravo")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![entry(&server, "Data/a.txt"), entry(&server, "Data/b.txt")];
        let report = downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap();

        m1.assert_async().await;
        m2.assert_async().await;
        assert_eq!(report.completed, 2);
        assert!(report.is_clean());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Data/a.txt")).unwrap(),
            "alpha"
        );

        let saved = Session::load(&session_path).unwrap().unwrap();
        assert!(saved.completed.contains("Data/a.txt"));
        assert!(saved.completed.contains("data/b.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped_and_recorded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Data/gone.txt")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![entry(&server, "Data/gone.txt")];
        let report = downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.missing, 1);
        assert_eq!(report.completed, 0);
        assert!(report.is_clean());
        assert!(session.completed.contains("Data/gone.txt"));
        assert!(!dir.path().join("Data/gone.txt").exists());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_once_then_succeeds() {
        use std::io::Write as _;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_mock = Arc::clone(&hits);

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Data/flaky.txt")
            .with_chunked_body(move |writer| {
                if hits_in_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                    writer.write_all(b"par")?;
                    Err(std::io::Error::other("connection reset"))
                } else {
                    writer.write_all(b"payload")
                }
            })
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![entry(&server, "Data/flaky.txt")];
        let report = downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(report.completed, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Data/flaky.txt")).unwrap(),
            "payload"
        );
    }

    #[tokio::test]
    async fn test_second_failure_abandons_without_checkpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Data/broken.txt")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![entry(&server, "Data/broken.txt")];
        let report = downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.abandoned, vec!["Data/broken.txt".to_string()]);
        assert!(!report.is_clean());
        assert!(!session.completed.contains("Data/broken.txt"));
        assert!(!dir.path().join("Data/broken.txt").exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_replaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Data/a.txt")
            .with_body("fresh")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Data")).unwrap();
        std::fs::write(dir.path().join("Data/a.txt"), "stale contents").unwrap();

        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![entry(&server, "Data/a.txt")];
        downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("Data/a.txt")).unwrap(),
            "fresh"
        );
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.toml");
        let mut session = Session::new("wow-15595-1.mfil", "enUS", "Win");
        let client = Client::new();
        let sink = NullSink;

        let entries = vec![FileEntry {
            url: "http://127.0.0.1:1/x".to_string(),
            path: "../outside.txt".to_string(),
            info: "base".to_string(),
            size: None,
        }];
        let err = downloader(&client, dir.path(), &session_path, &sink)
            .run(&entries, &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::UnsafePath(_)));
    }
}
