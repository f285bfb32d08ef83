use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::SyncError;
use super::file_times::set_modified_millis;
use super::loop_guard::LoopGuard;
use super::status::StatusBoard;
use super::transfer::TransferClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteDeleteMode {
    #[default]
    Unlink,
    Trash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub name: String,
    pub content_ref: String,
    pub target: PathBuf,
    /// Catalog mtime to stamp on the file. `None` keeps the download time.
    pub modified_at_ms: Option<i64>,
}

/// Applies remote changes to the local folder under the loop guard.
#[derive(Clone)]
pub struct LocalWriter {
    pub transfer: TransferClient,
    pub guard: LoopGuard,
    pub status: StatusBoard,
    pub delete_mode: RemoteDeleteMode,
}

impl LocalWriter {
    /// Fetches the blob into place and stamps the catalog mtime on it. The
    /// guard is released on the delayed schedule whatever the outcome.
    pub async fn download(&self, request: &DownloadRequest) -> Result<(), SyncError> {
        self.guard.guard(&request.name);
        let result = self.fetch(request).await;
        self.guard.release(&request.name);

        match &result {
            Ok(()) => self.status.set(format!("Downloaded: {}", request.name)),
            Err(err) => {
                warn!(name = %request.name, error = %err, "download failed");
                self.status
                    .set(format!("Error downloading {}: {err}", request.name));
            }
        }
        result
    }

    async fn fetch(&self, request: &DownloadRequest) -> Result<(), SyncError> {
        self.transfer
            .download_to_path(&request.content_ref, &request.target)
            .await?;
        if let Some(modified_at_ms) = request.modified_at_ms {
            set_modified_millis(&request.target, modified_at_ms).await?;
        }
        Ok(())
    }

    /// Removes `target` on behalf of a remote deletion. Returns whether a
    /// file was actually there.
    pub async fn delete_local(&self, name: &str, target: &Path) -> Result<bool, SyncError> {
        self.guard.guard(name);
        let result = remove(target, self.delete_mode).await;
        self.guard.release(name);

        match &result {
            Ok(true) => self.status.set(format!("Removed locally: {name}")),
            Ok(false) => debug!(name = %name, "remote removal had no local file"),
            Err(err) => {
                warn!(name = %name, error = %err, "local removal failed");
                self.status.set(format!("Error removing {name}: {err}"));
            }
        }
        result
    }
}

async fn remove(target: &Path, mode: RemoteDeleteMode) -> Result<bool, SyncError> {
    match mode {
        RemoteDeleteMode::Unlink => match tokio::fs::remove_file(target).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        },
        RemoteDeleteMode::Trash => {
            if !tokio::fs::try_exists(target).await? {
                return Ok(false);
            }
            let target = target.to_path_buf();
            tokio::task::spawn_blocking(move || trash::delete(&target))
                .await
                .map_err(io::Error::other)??;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::file_times::modified_millis;
    use crate::sync::paths::partial_path;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn writer() -> LocalWriter {
        LocalWriter {
            transfer: TransferClient::new(),
            guard: LoopGuard::new(Duration::from_millis(2000)),
            status: StatusBoard::default(),
            delete_mode: RemoteDeleteMode::Unlink,
        }
    }

    #[tokio::test]
    async fn download_writes_content_and_mtime_and_guards_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blobs/a.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<a/>"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("a.xml");
        let writer = writer();
        writer
            .download(&DownloadRequest {
                name: "a.xml".into(),
                content_ref: format!("{}/blobs/a.xml", server.uri()),
                target: target.clone(),
                modified_at_ms: Some(1_700_000_123_456),
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"<a/>");
        assert_eq!(modified_millis(&target).await.unwrap(), 1_700_000_123_456);
        assert!(writer.guard.is_guarded("a.xml"));
        assert_eq!(writer.status.current(), "Downloaded: a.xml");
    }

    #[tokio::test]
    async fn failed_download_cleans_partial_and_still_releases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("a.xml");
        let writer = LocalWriter {
            guard: LoopGuard::new(Duration::ZERO),
            ..writer()
        };
        let err = writer
            .download(&DownloadRequest {
                name: "a.xml".into(),
                content_ref: format!("{}/blobs/a.xml", server.uri()),
                target: target.clone(),
                modified_at_ms: Some(0),
            })
            .await
            .expect_err("404 should fail");

        assert!(matches!(err, SyncError::Transfer(_)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
        assert!(!writer.guard.is_guarded("a.xml"));
        assert!(writer.status.current().starts_with("Error downloading a.xml: "));
    }

    #[tokio::test]
    async fn delete_local_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("gone.xml");
        let writer = writer();

        assert!(!writer.delete_local("gone.xml", &target).await.unwrap());
        assert!(writer.guard.is_guarded("gone.xml"));
    }

    #[tokio::test]
    async fn delete_local_unlinks_existing_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.xml");
        std::fs::write(&target, b"<a/>").unwrap();
        let writer = writer();

        assert!(writer.delete_local("a.xml", &target).await.unwrap());
        assert!(!target.exists());
        assert_eq!(writer.status.current(), "Removed locally: a.xml");
    }
}
