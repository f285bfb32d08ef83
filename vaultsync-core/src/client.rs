use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use crate::feed::ChangeFeed;
use crate::record::{
    Account, BlobRef, ChangeBatch, ChangeKind, ChangePage, FileRecord, NewFileRecord,
    RecordList, RecordUpdate, SortOrder, TimestampError,
};

const DEFAULT_BASE_URL: &str = "https://api.vaultsync.app";
const LOCAL_WRITE_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments")]
    BaseUrl,
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] TimestampError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    Transient,
    Permanent,
}

/// Client for the catalog, blob and change-feed endpoints.
///
/// Clones share one local-write channel, so a feed opened from any clone
/// sees the optimistic snapshots of writes issued through every other clone.
#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    base_url: Url,
    token: String,
    local_writes: broadcast::Sender<ChangeBatch>,
}

impl StoreClient {
    pub fn new(token: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, StoreError> {
        let (local_writes, _) = broadcast::channel(LOCAL_WRITE_BUFFER);
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            local_writes,
        })
    }

    pub async fn get_account(&self) -> Result<Account, StoreError> {
        let url = self.endpoint("/v1/account")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn find_record(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        url.query_pairs_mut()
            .append_pair("owner_id", owner_id)
            .append_pair("name", name)
            .append_pair("limit", "1");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let list: RecordList = Self::handle_response(response).await?;
        Ok(list.items.into_iter().next())
    }

    pub async fn list_records(
        &self,
        owner_id: &str,
        extension: Option<&str>,
        order: SortOrder,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("owner_id", owner_id);
            if let Some(extension) = extension.filter(|ext| !ext.is_empty()) {
                query.append_pair("extension", extension);
            }
            query
                .append_pair("order_by", "uploaded_at")
                .append_pair("direction", order.as_str());
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let list: RecordList = Self::handle_response(response).await?;
        Ok(list.items)
    }

    pub async fn create_record(&self, record: &NewFileRecord) -> Result<FileRecord, StoreError> {
        self.publish_local_write(ChangeBatch::pending(
            ChangeKind::Added,
            record.pending_snapshot(),
        ));
        let url = self.endpoint("/v1/files")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(record)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn update_record(
        &self,
        existing: &FileRecord,
        update: &RecordUpdate,
    ) -> Result<FileRecord, StoreError> {
        self.publish_local_write(ChangeBatch::pending(
            ChangeKind::Modified,
            existing.with_update(update),
        ));
        let url = self.record_url(&existing.id)?;
        let response = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header_value())
            .json(update)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_record(&self, record: &FileRecord) -> Result<(), StoreError> {
        self.publish_local_write(ChangeBatch::pending(ChangeKind::Removed, record.clone()));
        let url = self.record_url(&record.id)?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn put_blob(
        &self,
        owner_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<BlobRef, StoreError> {
        let url = self.blob_url(owner_id, name)?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_blob(&self, owner_id: &str, name: &str) -> Result<(), StoreError> {
        let url = self.blob_url(owner_id, name)?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn changes(
        &self,
        owner_id: &str,
        cursor: Option<&str>,
    ) -> Result<ChangePage, StoreError> {
        let mut url = self.endpoint("/v1/changes")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("owner_id", owner_id);
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Opens a change subscription for `owner_id`. The first poll returns
    /// every existing record as `added`.
    pub fn change_feed(&self, owner_id: impl Into<String>, poll_interval: Duration) -> ChangeFeed {
        ChangeFeed::new(
            self.clone(),
            owner_id.into(),
            poll_interval,
            self.local_writes.subscribe(),
        )
    }

    fn publish_local_write(&self, batch: ChangeBatch) {
        // No subscribers simply means no feed is open.
        let _ = self.local_writes.send(batch);
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }

    fn record_url(&self, id: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint("/v1/files")?;
        url.path_segments_mut()
            .map_err(|_| StoreError::BaseUrl)?
            .push(id);
        Ok(url)
    }

    fn blob_url(&self, owner_id: &str, name: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint("/v1/blobs")?;
        url.path_segments_mut()
            .map_err(|_| StoreError::BaseUrl)?
            .push(owner_id)
            .push(name);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), StoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }
}

impl StoreError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            StoreError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::NotFound))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
