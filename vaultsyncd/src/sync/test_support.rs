use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use vaultsync_core::{Account, StoreClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::context::{InFlightUploads, SyncContext};
use super::download::{LocalWriter, RemoteDeleteMode};
use super::loop_guard::LoopGuard;
use super::status::StatusBoard;
use super::transfer::TransferClient;

pub fn record_json(id: &str, name: &str, modified_at: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "extension": vaultsync_core::extension_of(name),
        "content_ref": format!("https://blobs.example/{name}"),
        "owner_id": "owner-1",
        "uploaded_at": "2024-01-01T00:00:00Z",
        "uploaded_by": "owner@example.com",
        "modified_at": modified_at,
        "modified_by": "owner@example.com"
    })
}

/// A mock store plus a scratch sync folder.
pub struct TestEnv {
    pub server: MockServer,
    dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn folder(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> StoreClient {
        StoreClient::with_base_url(&self.server.uri(), "test-token").unwrap()
    }

    pub fn context(&self) -> SyncContext {
        SyncContext {
            store: self.store(),
            account: Account {
                owner_id: "owner-1".into(),
                email: Some("owner@example.com".into()),
            },
            folder: self.folder().to_path_buf(),
            writer: LocalWriter {
                transfer: TransferClient::new(),
                guard: LoopGuard::new(Duration::from_millis(2000)),
                status: StatusBoard::default(),
                delete_mode: RemoteDeleteMode::Unlink,
            },
            uploads: InFlightUploads::default(),
            echo_tolerance: Duration::from_millis(2000),
        }
    }

    pub async fn mock_find(&self, name: &str, items: Value) {
        Mock::given(method("GET"))
            .and(path("/v1/files"))
            .and(query_param("owner_id", "owner-1"))
            .and(query_param("name", name))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_account(&self) {
        Mock::given(method("GET"))
            .and(path("/v1/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "owner_id": "owner-1",
                "email": "owner@example.com"
            })))
            .mount(&self.server)
            .await;
    }
}
