use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use vaultsync_core::{SortOrder, parse_millis};
use vaultsync_integrations::ids::{
    DBUS_ERROR_FAILED, DBUS_ERROR_INVALID_PATH, DBUS_ERROR_NOT_READY, DBUS_ERROR_UNAUTHENTICATED,
};
use zbus::{interface, object_server::SignalEmitter};

use crate::folder_picker::pick_folder;
use crate::storage::TokenStorage;
use crate::sync::session::{SessionError, SyncSession};

pub type SharedSession = Arc<Mutex<SyncSession>>;

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("{0}")]
    NotReady(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{0}")]
    Failed(String),
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::NotReady(_) => DBUS_ERROR_NOT_READY,
        DbusServiceError::Unauthenticated => DBUS_ERROR_UNAUTHENTICATED,
        DbusServiceError::InvalidPath(_) => DBUS_ERROR_INVALID_PATH,
        DbusServiceError::Failed(_) => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: DbusServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

impl From<SessionError> for DbusServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NoFolder => DbusServiceError::NotReady(err.to_string()),
            SessionError::Unauthenticated => DbusServiceError::Unauthenticated,
            SessionError::Store(ref store) if store.is_auth() => DbusServiceError::Unauthenticated,
            SessionError::NotADirectory(_) | SessionError::Path(_) => {
                DbusServiceError::InvalidPath(err.to_string())
            }
            other => DbusServiceError::Failed(other.to_string()),
        }
    }
}

fn map_session_error(err: SessionError) -> zbus::fdo::Error {
    map_to_fdo(err.into())
}

fn absolute_path(path: &str) -> Result<PathBuf, DbusServiceError> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(DbusServiceError::InvalidPath(path.display().to_string()))
    }
}

fn path_string(path: Option<&std::path::Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_default()
}

pub struct SyncDbusService {
    session: SharedSession,
    persist_tokens: bool,
}

impl SyncDbusService {
    pub fn new(session: SharedSession) -> Self {
        Self {
            session,
            persist_tokens: true,
        }
    }

    /// Keeps `Login`/`Logout` in memory instead of touching the keyring.
    pub fn without_token_persistence(mut self) -> Self {
        self.persist_tokens = false;
        self
    }

    fn token_storage(&self) -> Result<Option<TokenStorage>, DbusServiceError> {
        if !self.persist_tokens {
            return Ok(None);
        }
        TokenStorage::new()
            .map(Some)
            .map_err(|err| DbusServiceError::Failed(format!("token storage error: {err}")))
    }
}

#[interface(name = "app.vaultsync.Sync1")]
impl SyncDbusService {
    async fn select_folder(&self) -> zbus::fdo::Result<String> {
        let picked = pick_folder()
            .await
            .map_err(|err| map_to_fdo(DbusServiceError::Failed(err.to_string())))?;
        let Some(folder) = picked else {
            info!("folder selection cancelled");
            return Ok(String::new());
        };
        let folder = self
            .session
            .lock()
            .await
            .set_folder(folder)
            .await
            .map_err(map_session_error)?;
        Ok(folder.display().to_string())
    }

    async fn set_folder(&self, path: &str) -> zbus::fdo::Result<String> {
        let folder = absolute_path(path).map_err(map_to_fdo)?;
        let folder = self
            .session
            .lock()
            .await
            .set_folder(folder)
            .await
            .map_err(map_session_error)?;
        Ok(folder.display().to_string())
    }

    async fn get_saved_path(&self) -> String {
        path_string(self.session.lock().await.saved_path())
    }

    async fn start_watching(&self, path: &str) -> zbus::fdo::Result<()> {
        let folder = if path.is_empty() {
            None
        } else {
            Some(absolute_path(path).map_err(map_to_fdo)?)
        };
        self.session
            .lock()
            .await
            .start(folder)
            .await
            .map_err(map_session_error)
    }

    async fn stop_watching(&self) {
        self.session.lock().await.stop();
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &str,
        modified_at: &str,
    ) -> zbus::fdo::Result<()> {
        let target = absolute_path(local_path).map_err(map_to_fdo)?;
        let modified_at_ms = parse_millis(modified_at).map_err(|err| {
            map_to_fdo(DbusServiceError::Failed(format!(
                "invalid modification time {modified_at:?}: {err}"
            )))
        })?;
        let job = self
            .session
            .lock()
            .await
            .download_job(url, &target, modified_at_ms)
            .map_err(map_session_error)?;
        job.run().await.map_err(map_session_error)
    }

    async fn delete_file(&self, local_path: &str) -> zbus::fdo::Result<()> {
        let target = absolute_path(local_path).map_err(map_to_fdo)?;
        let job = self
            .session
            .lock()
            .await
            .delete_job(&target)
            .map_err(map_session_error)?;
        job.run().await.map_err(map_session_error)
    }

    async fn get_status(&self) -> (String, String) {
        let session = self.session.lock().await;
        (
            session.phase().as_str().to_string(),
            session.status().current(),
        )
    }

    async fn login(&self, token: &str) -> zbus::fdo::Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(map_to_fdo(DbusServiceError::Unauthenticated));
        }
        if let Some(storage) = self.token_storage().map_err(map_to_fdo)? {
            storage.save_token(token).map_err(|err| {
                map_to_fdo(DbusServiceError::Failed(format!("failed to save token: {err}")))
            })?;
        }
        self.session
            .lock()
            .await
            .set_token(Some(token.to_string()))
            .map_err(map_session_error)?;
        info!("signed in");
        Ok(())
    }

    async fn logout(&self) -> zbus::fdo::Result<()> {
        if let Some(storage) = self.token_storage().map_err(map_to_fdo)? {
            storage.delete_token().map_err(|err| {
                map_to_fdo(DbusServiceError::Failed(format!("logout failed: {err}")))
            })?;
        }
        self.session
            .lock()
            .await
            .set_token(None)
            .map_err(map_session_error)?;
        info!("signed out");
        Ok(())
    }

    async fn list_files(&self, extension: &str) -> zbus::fdo::Result<Vec<(String, String, String)>> {
        let extension = Some(extension).filter(|ext| !ext.is_empty());
        let files = self
            .session
            .lock()
            .await
            .list_files(extension, SortOrder::Descending)
            .await
            .map_err(map_session_error)?;
        Ok(files
            .into_iter()
            .map(|file| (file.name, file.extension, file.uploaded_at))
            .collect())
    }

    #[zbus(signal)]
    pub async fn sync_status(ctxt: &SignalEmitter<'_>, text: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn local_file_changed(
        ctxt: &SignalEmitter<'_>,
        name: &str,
        content: &[u8],
        modified_at_ms: i64,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn local_file_deleted(ctxt: &SignalEmitter<'_>, name: &str) -> zbus::Result<()>;
}
