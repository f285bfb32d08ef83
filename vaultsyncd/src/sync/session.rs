use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vaultsync_core::{Account, FileRecord, SortOrder, StoreClient, StoreError};
use vaultsync_integrations::SessionPhase;

use super::cloud_listener::{RemoteCommand, run_listener};
use super::context::{DEFAULT_ECHO_TOLERANCE, InFlightUploads, SharedContext, SyncContext};
use super::dispatch::run_dispatcher;
use super::download::{DownloadRequest, LocalWriter, RemoteDeleteMode};
use super::local_watcher::{LocalWatcher, WatchConfig};
use super::loop_guard::{DEFAULT_GRACE, LoopGuard};
use super::paths::{PathError, name_for};
use super::status::StatusBoard;
use super::transfer::{TransferClient, TransferConfig};
use super::SyncError;
use crate::settings::{SettingsError, SettingsStore};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no sync folder selected")]
    NoFolder,
    #[error("not signed in")]
    Unauthenticated,
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to watch folder: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_url: String,
    pub grace: Duration,
    pub echo_tolerance: Duration,
    pub watch: WatchConfig,
    pub feed_poll: Duration,
    pub transfer: TransferConfig,
    pub remote_delete: RemoteDeleteMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.vaultsync.app".to_string(),
            grace: DEFAULT_GRACE,
            echo_tolerance: DEFAULT_ECHO_TOLERANCE,
            watch: WatchConfig::default(),
            feed_poll: Duration::from_secs(5),
            transfer: TransferConfig::default(),
            remote_delete: RemoteDeleteMode::Unlink,
        }
    }
}

struct RunningSync {
    ctx: SharedContext,
    _watcher: LocalWatcher,
    listener: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Lifecycle owner: folder choice, credentials, and the running watcher and
/// listener. Only the session toggles between `Ready` and `Active`.
pub struct SyncSession {
    config: SessionConfig,
    settings: SettingsStore,
    folder: Option<PathBuf>,
    store: Option<StoreClient>,
    writer: LocalWriter,
    uploads: InFlightUploads,
    running: Option<RunningSync>,
}

impl SyncSession {
    pub fn new(
        config: SessionConfig,
        settings: SettingsStore,
        token: Option<String>,
    ) -> Result<Self, SessionError> {
        let folder = settings.folder();
        let writer = LocalWriter {
            transfer: TransferClient::with_config(config.transfer),
            guard: LoopGuard::new(config.grace),
            status: StatusBoard::default(),
            delete_mode: config.remote_delete,
        };
        let mut session = Self {
            config,
            settings,
            folder,
            store: None,
            writer,
            uploads: InFlightUploads::default(),
            running: None,
        };
        session.store = token
            .map(|token| session.build_client(token))
            .transpose()?;
        Ok(session)
    }

    fn build_client(&self, token: String) -> Result<StoreClient, StoreError> {
        StoreClient::with_base_url(&self.config.api_url, token)
    }

    pub fn phase(&self) -> SessionPhase {
        if self.running.is_some() {
            SessionPhase::Active
        } else if self.folder.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.writer.status
    }

    pub fn saved_path(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.store.is_some()
    }

    /// Persists `folder` as the sync folder. An active session is stopped
    /// first.
    pub async fn set_folder(&mut self, folder: PathBuf) -> Result<PathBuf, SessionError> {
        let is_dir = tokio::fs::metadata(&folder)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SessionError::NotADirectory(folder));
        }
        self.stop();
        self.settings.set_folder(&folder).await?;
        info!(folder = %folder.display(), "sync folder selected");
        self.folder = Some(folder.clone());
        Ok(folder)
    }

    /// Starts watching. With `folder`, switches to it first. Starting the
    /// folder that is already active does nothing.
    pub async fn start(&mut self, folder: Option<PathBuf>) -> Result<(), SessionError> {
        if let Some(folder) = folder.filter(|folder| !folder.as_os_str().is_empty()) {
            if self.folder.as_ref() != Some(&folder) {
                self.set_folder(folder).await?;
            }
        }
        let active_folder = self.running.as_ref().map(|running| running.ctx.folder.clone());
        if let Some(active_folder) = active_folder {
            if self.folder.as_ref() == Some(&active_folder) {
                return Ok(());
            }
            self.stop();
        }

        let folder = self.folder.clone().ok_or(SessionError::NoFolder)?;
        let store = self.store.clone().ok_or(SessionError::Unauthenticated)?;
        let account = fetch_account(&store).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(SyncContext {
            store: store.clone(),
            account: account.clone(),
            folder: folder.clone(),
            writer: self.writer.clone(),
            uploads: self.uploads.clone(),
            echo_tolerance: self.config.echo_tolerance,
        });
        let watcher = LocalWatcher::start(
            &folder,
            self.config.watch,
            self.writer.guard.clone(),
            events_tx.clone(),
        )?;
        self.status().set("Sync starting... Watching for changes.");
        let feed = store.change_feed(account.owner_id.clone(), self.config.feed_poll);
        let listener = tokio::spawn(run_listener(
            feed,
            folder.clone(),
            self.writer.status.clone(),
            events_tx,
        ));
        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&ctx), events_rx));

        self.running = Some(RunningSync {
            ctx,
            _watcher: watcher,
            listener,
            dispatcher,
        });
        info!(folder = %folder.display(), owner = %account.owner_id, "sync started");
        Ok(())
    }

    /// Detaches watcher and listener. Work already past admission finishes
    /// on its own. Stopping an inactive session does nothing.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.listener.abort();
        running.dispatcher.abort();
        drop(running);
        self.writer.guard.drain();
        self.status().set("Sync stopped.");
    }

    /// Prepares a download of `url` to `local_path` outside the watcher
    /// flow. The job runs without borrowing the session.
    pub fn download_job(
        &self,
        url: &str,
        local_path: &Path,
        modified_at_ms: i64,
    ) -> Result<LocalJob, SessionError> {
        Ok(LocalJob {
            writer: self.writer.clone(),
            command: RemoteCommand::Download(DownloadRequest {
                name: self.name_for_local(local_path)?,
                content_ref: url.to_string(),
                target: local_path.to_path_buf(),
                modified_at_ms: Some(modified_at_ms),
            }),
        })
    }

    pub fn delete_job(&self, local_path: &Path) -> Result<LocalJob, SessionError> {
        Ok(LocalJob {
            writer: self.writer.clone(),
            command: RemoteCommand::DeleteLocal {
                name: self.name_for_local(local_path)?,
                target: local_path.to_path_buf(),
            },
        })
    }

    pub async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        modified_at_ms: i64,
    ) -> Result<(), SessionError> {
        self.download_job(url, local_path, modified_at_ms)?
            .run()
            .await
    }

    pub async fn delete_file(&self, local_path: &Path) -> Result<(), SessionError> {
        self.delete_job(local_path)?.run().await
    }

    /// Replaces the API credentials. Signing out stops an active session.
    pub fn set_token(&mut self, token: Option<String>) -> Result<(), SessionError> {
        self.stop();
        self.store = token.map(|token| self.build_client(token)).transpose()?;
        if self.store.is_none() {
            self.status().set("Not syncing.");
        }
        Ok(())
    }

    pub async fn list_files(
        &self,
        extension: Option<&str>,
        order: SortOrder,
    ) -> Result<Vec<FileRecord>, SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::Unauthenticated)?;
        let owner_id = match &self.running {
            Some(running) => running.ctx.account.owner_id.clone(),
            None => fetch_account(store).await?.owner_id,
        };
        let extension = extension.map(|ext| ext.trim_start_matches('.').to_ascii_lowercase());
        Ok(store
            .list_records(&owner_id, extension.as_deref(), order)
            .await?)
    }

    /// Catalog name for a path given over the control surface: relative to
    /// the sync folder when inside it, else the bare file name.
    fn name_for_local(&self, local_path: &Path) -> Result<String, SessionError> {
        if let Some(folder) = &self.folder
            && let Ok(name) = name_for(folder, local_path)
        {
            return Ok(name);
        }
        local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(SessionError::Path(PathError::Empty))
    }
}

/// A guarded local write requested over the control surface.
pub struct LocalJob {
    writer: LocalWriter,
    command: RemoteCommand,
}

impl LocalJob {
    pub async fn run(self) -> Result<(), SessionError> {
        match &self.command {
            RemoteCommand::Download(request) => self.writer.download(request).await?,
            RemoteCommand::DeleteLocal { name, target } => {
                self.writer.delete_local(name, target).await?;
            }
        }
        Ok(())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if self.running.is_some() {
            warn!("sync session dropped while active");
            self.stop();
        }
    }
}

async fn fetch_account(store: &StoreClient) -> Result<Account, SessionError> {
    store.get_account().await.map_err(|err| {
        if err.is_auth() {
            SessionError::Unauthenticated
        } else {
            SessionError::Store(err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{TestEnv, record_json};
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    async fn session(env: &TestEnv, token: Option<&str>) -> (SyncSession, tempfile::TempDir) {
        let settings_dir = tempdir().unwrap();
        let settings = SettingsStore::load(settings_dir.path().join("settings.json"))
            .await
            .unwrap();
        let config = SessionConfig {
            api_url: env.server.uri(),
            feed_poll: Duration::from_secs(60),
            ..SessionConfig::default()
        };
        let session = SyncSession::new(config, settings, token.map(str::to_string)).unwrap();
        (session, settings_dir)
    }

    async fn mock_empty_feed(env: &TestEnv) {
        Mock::given(method("GET"))
            .and(path("/v1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cursor": "c-0",
                "changes": []
            })))
            .mount(&env.server)
            .await;
    }

    #[tokio::test]
    async fn phases_follow_folder_and_activity() {
        let env = TestEnv::start().await;
        env.mock_account().await;
        mock_empty_feed(&env).await;
        let (mut session, _settings) = session(&env, Some("test-token")).await;
        assert_eq!(session.phase(), SessionPhase::Idle);

        session.set_folder(env.folder().to_path_buf()).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);

        session.start(None).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(
            session.status().current(),
            "Sync starting... Watching for changes."
        );

        session.stop();
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.status().current(), "Sync stopped.");

        session.stop();
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_cloud_batch_is_not_hidden_by_start_status() {
        let env = TestEnv::start().await;
        env.mock_account().await;
        let mut record = record_json("r1", "a.xml", "2024-01-01T00:00:00Z");
        record["content_ref"] = json!(format!("{}/blobs/a.xml", env.server.uri()));
        Mock::given(method("GET"))
            .and(path("/v1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cursor": "c-1",
                "changes": [{ "kind": "added", "record": record }]
            })))
            .mount(&env.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blobs/a.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<a/>"))
            .expect(1)
            .mount(&env.server)
            .await;
        let (mut session, _settings) = session(&env, Some("test-token")).await;
        session.set_folder(env.folder().to_path_buf()).await.unwrap();

        session.start(None).await.unwrap();

        let mut status = session.status().subscribe();
        tokio::time::timeout(Duration::from_secs(10), async {
            while *status.borrow_and_update() != "Downloaded: a.xml" {
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("download should finish");
        assert_eq!(std::fs::read(env.folder().join("a.xml")).unwrap(), b"<a/>");
        assert_eq!(session.status().current(), "Downloaded: a.xml");
        session.stop();
    }

    #[tokio::test]
    async fn start_requires_folder() {
        let env = TestEnv::start().await;
        let (mut session, _settings) = session(&env, Some("test-token")).await;
        assert!(matches!(
            session.start(None).await,
            Err(SessionError::NoFolder)
        ));
    }

    #[tokio::test]
    async fn start_requires_credentials() {
        let env = TestEnv::start().await;
        let (mut session, _settings) = session(&env, None).await;
        session.set_folder(env.folder().to_path_buf()).await.unwrap();
        assert!(matches!(
            session.start(None).await,
            Err(SessionError::Unauthenticated)
        ));
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn rejected_token_is_unauthenticated() {
        let env = TestEnv::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/account"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&env.server)
            .await;
        let (mut session, _settings) = session(&env, Some("stale")).await;
        assert!(matches!(
            session.start(Some(env.folder().to_path_buf())).await,
            Err(SessionError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn folder_is_persisted_for_next_launch() {
        let env = TestEnv::start().await;
        let settings_dir = tempdir().unwrap();
        let settings_path = settings_dir.path().join("settings.json");
        {
            let settings = SettingsStore::load(&settings_path).await.unwrap();
            let mut session = SyncSession::new(SessionConfig::default(), settings, None).unwrap();
            session.set_folder(env.folder().to_path_buf()).await.unwrap();
        }

        let settings = SettingsStore::load(&settings_path).await.unwrap();
        let session = SyncSession::new(SessionConfig::default(), settings, None).unwrap();
        assert_eq!(session.saved_path(), Some(env.folder()));
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn set_folder_rejects_files() {
        let env = TestEnv::start().await;
        let file = env.folder().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let (mut session, _settings) = session(&env, None).await;
        assert!(matches!(
            session.set_folder(file).await,
            Err(SessionError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn sign_out_stops_active_sync() {
        let env = TestEnv::start().await;
        env.mock_account().await;
        mock_empty_feed(&env).await;
        let (mut session, _settings) = session(&env, Some("test-token")).await;
        session.start(Some(env.folder().to_path_buf())).await.unwrap();

        session.set_token(None).unwrap();

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(!session.is_signed_in());
    }

    #[tokio::test]
    async fn delete_file_uses_folder_relative_name() {
        let env = TestEnv::start().await;
        let (mut session, _settings) = session(&env, None).await;
        session.set_folder(env.folder().to_path_buf()).await.unwrap();
        std::fs::create_dir(env.folder().join("docs")).unwrap();
        let target = env.folder().join("docs/a.xml");
        std::fs::write(&target, b"<a/>").unwrap();

        session.delete_file(&target).await.unwrap();
        assert!(!target.exists());
        assert!(session.writer.guard.is_guarded("docs/a.xml"));
    }

    #[tokio::test]
    async fn list_files_filters_by_lowercased_extension() {
        let env = TestEnv::start().await;
        env.mock_account().await;
        Mock::given(method("GET"))
            .and(path("/v1/files"))
            .and(query_param("extension", "png"))
            .and(query_param("direction", "asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [record_json("r1", "scan.png", "2024-01-01T00:00:00Z")]
            })))
            .expect(1)
            .mount(&env.server)
            .await;
        let (session, _settings) = session(&env, Some("test-token")).await;

        let files = session
            .list_files(Some(".PNG"), SortOrder::Ascending)
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "scan.png");
    }
}
