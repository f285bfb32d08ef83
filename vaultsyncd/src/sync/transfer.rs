use std::{io, path::Path, sync::Arc};

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;
use url::Url;

use super::paths::partial_path;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            upload_concurrency: 2,
        }
    }
}

/// Blob downloads and the upload admission limit.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    download_limit: Arc<Semaphore>,
    upload_limit: Arc<Semaphore>,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            http: Client::new(),
            download_limit: Arc::new(Semaphore::new(permits(config.download_concurrency))),
            upload_limit: Arc::new(Semaphore::new(permits(config.upload_concurrency))),
        }
    }

    /// Streams `href` into a hidden partial sibling and renames it into place.
    /// The partial file is removed on any failure; `target` is never touched
    /// unless the whole body arrived.
    pub async fn download_to_path(&self, href: &str, target: &Path) -> Result<(), TransferError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let url = Url::parse(href)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let result = self.fetch_into(url, &partial).await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, target)
                .await
                .map_err(TransferError::from),
            Err(err) => Err(err),
        };
        if result.is_err() {
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %partial.display(), error = %err, "failed to remove partial download");
                }
            }
        }
        result
    }

    async fn fetch_into(&self, url: Url, partial: &Path) -> Result<(), TransferError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Waits for an upload slot. Hold the permit for the duration of the
    /// blob transfer.
    pub async fn upload_permit(&self) -> Result<OwnedSemaphorePermit, TransferError> {
        self.upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)
    }
}

fn permits(limit: usize) -> usize {
    limit.clamp(1, Semaphore::MAX_PERMITS)
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}
