//! Streaming HTTP transfer of one file.

use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::ui::{Progress, ProgressSink};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("length mismatch: server reported {expected} bytes, wrote {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

impl DownloadError {
    /// The remote says the file does not exist. Manifests routinely list
    /// files a mirror never carried, so callers treat this as a soft skip
    /// rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Http(err) => err.status() == Some(StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}

/// Stream `url` into `dest`, reporting snapshots labelled `label` to the
/// sink. On any failure the partial file is removed. When the server
/// reports a content length, the bytes on disk must match it exactly.
/// Returns the number of bytes written.
pub async fn fetch(
    client: &Client,
    url: &str,
    dest: &Path,
    label: &str,
    sink: &dyn ProgressSink,
) -> Result<u64, DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?;

    let total = response.content_length();
    sink.update(Progress::Download {
        path: label.to_string(),
        received: 0,
        total,
    });

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    let streamed: Result<(), DownloadError> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            sink.update(Progress::Download {
                path: label.to_string(),
                received,
                total,
            });
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = streamed {
        tokio::fs::remove_file(dest).await.ok();
        return Err(err);
    }

    let written = tokio::fs::metadata(dest).await?.len();
    if let Some(expected) = total {
        if written != expected {
            tokio::fs::remove_file(dest).await.ok();
            return Err(DownloadError::LengthMismatch {
                expected,
                actual: written,
            });
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::NullSink;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fetch_writes_body_to_dest() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Data/base.MPQ.0")
            .with_status(200)
            .with_body(b"chunk payload")
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("base.MPQ.0");
        let url = format!("{}/Data/base.MPQ.0", server.url());

        let written = fetch(&Client::new(), &url, &dest, "Data/base.MPQ.0", &NullSink)
            .await
            .unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"chunk payload");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_classifies_missing_files() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Data/gone.MPQ.0")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("gone.MPQ.0");
        let url = format!("{}/Data/gone.MPQ.0", server.url());

        let err = fetch(&Client::new(), &url, &dest, "Data/gone.MPQ.0", &NullSink)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_not_a_soft_skip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Data/base.MPQ.0")
            .with_status(503)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("base.MPQ.0");
        let url = format!("{}/Data/base.MPQ.0", server.url());

        let err = fetch(&Client::new(), &url, &dest, "Data/base.MPQ.0", &NullSink)
            .await
            .unwrap_err();

        assert!(!err.is_not_found());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_removes_partial_file_on_aborted_body() {
        use std::io::Write as _;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Data/base.MPQ.0")
            .with_chunked_body(|writer| {
                writer.write_all(b"partial")?;
                Err(std::io::Error::other("connection reset"))
            })
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("base.MPQ.0");
        let url = format!("{}/Data/base.MPQ.0", server.url());

        let err = fetch(&Client::new(), &url, &dest, "Data/base.MPQ.0", &NullSink)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Http(_)));
        assert!(!dest.exists());
    }
}
