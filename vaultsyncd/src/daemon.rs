use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use vaultsync_integrations::SessionPhase;
use vaultsync_integrations::ids::{DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::dbus_api::{SharedSession, SyncDbusService};
use crate::settings::SettingsStore;
use crate::storage::resolve_token;
use crate::sync::download::RemoteDeleteMode;
use crate::sync::local_watcher::WatchConfig;
use crate::sync::retry::RetryPolicy;
use crate::sync::session::{SessionConfig, SyncSession};
use crate::sync::status::{Notification, StatusBoard};
use crate::sync::transfer::TransferConfig;

const DEFAULT_API_URL: &str = "https://api.vaultsync.app";
const DEFAULT_GRACE_MS: u64 = 2000;
const DEFAULT_ECHO_TOLERANCE_MS: u64 = 2000;
const DEFAULT_STABLE_MS: u64 = 1500;
const DEFAULT_STABLE_POLL_MS: u64 = 100;
const DEFAULT_READ_ATTEMPTS: u64 = 5;
const DEFAULT_READ_RETRY_MS: u64 = 500;
const DEFAULT_FEED_POLL_SECS: u64 = 5;
const DEFAULT_DOWNLOAD_CONCURRENCY: u64 = 4;
const DEFAULT_UPLOAD_CONCURRENCY: u64 = 2;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub settings_file: PathBuf,
    pub token: Option<String>,
    pub autostart: bool,
    pub session: SessionConfig,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_vars(&home, |name| std::env::var(name).ok()))
    }

    pub fn from_vars<F>(home: &Path, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings_file = var("VAULTSYNC_SETTINGS_FILE")
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(SettingsStore::default_path);
        let api_url = var("VAULTSYNC_API_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = var("VAULTSYNC_TOKEN").filter(|value| !value.trim().is_empty());

        let watch = WatchConfig {
            stable_for: Duration::from_millis(read_u64(&var, "VAULTSYNC_STABLE_MS", DEFAULT_STABLE_MS)),
            poll_every: Duration::from_millis(read_u64(
                &var,
                "VAULTSYNC_STABLE_POLL_MS",
                DEFAULT_STABLE_POLL_MS,
            )),
            retry: RetryPolicy::new(
                read_u64(&var, "VAULTSYNC_READ_ATTEMPTS", DEFAULT_READ_ATTEMPTS)
                    .try_into()
                    .unwrap_or(u32::MAX),
                Duration::from_millis(read_u64(
                    &var,
                    "VAULTSYNC_READ_RETRY_MS",
                    DEFAULT_READ_RETRY_MS,
                )),
            ),
        };
        let transfer = TransferConfig {
            download_concurrency: read_usize(
                &var,
                "VAULTSYNC_DOWNLOAD_CONCURRENCY",
                DEFAULT_DOWNLOAD_CONCURRENCY,
            ),
            upload_concurrency: read_usize(
                &var,
                "VAULTSYNC_UPLOAD_CONCURRENCY",
                DEFAULT_UPLOAD_CONCURRENCY,
            ),
        };
        let remote_delete = if read_bool(&var, "VAULTSYNC_TRASH_REMOTE_DELETES", false) {
            RemoteDeleteMode::Trash
        } else {
            RemoteDeleteMode::Unlink
        };

        Self {
            settings_file,
            token,
            autostart: read_bool(&var, "VAULTSYNC_AUTOSTART", false),
            session: SessionConfig {
                api_url,
                grace: Duration::from_millis(read_u64(&var, "VAULTSYNC_GRACE_MS", DEFAULT_GRACE_MS)),
                echo_tolerance: Duration::from_millis(read_u64(
                    &var,
                    "VAULTSYNC_ECHO_TOLERANCE_MS",
                    DEFAULT_ECHO_TOLERANCE_MS,
                )),
                watch,
                feed_poll: Duration::from_secs(read_u64(
                    &var,
                    "VAULTSYNC_FEED_POLL_SECS",
                    DEFAULT_FEED_POLL_SECS,
                )),
                transfer,
                remote_delete,
            },
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    session: SharedSession,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let settings = SettingsStore::load(&config.settings_file)
            .await
            .with_context(|| format!("failed to load settings from {:?}", config.settings_file))?;
        let token = resolve_token(config.token.clone()).context("failed to read saved token")?;
        if token.is_none() {
            warn!("no API token; sign in over D-Bus before starting sync");
        }
        let session = SyncSession::new(config.session.clone(), settings, token)
            .context("failed to initialize sync session")?;
        Ok(Self {
            config,
            session: Arc::new(Mutex::new(session)),
        })
    }

    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    /// Starts syncing the saved folder when autostart is on and the session
    /// can start. Failures are logged, not fatal.
    pub async fn autostart(&self) {
        if !self.config.autostart {
            return;
        }
        let mut session = self.session.lock().await;
        if session.phase() != SessionPhase::Ready || !session.is_signed_in() {
            info!(phase = session.phase().as_str(), "autostart skipped");
            return;
        }
        if let Err(err) = session.start(None).await {
            warn!(error = %err, "autostart failed");
            session.status().set(format!("Sync not started: {err}"));
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let (status, saved) = {
            let session = self.session.lock().await;
            (
                session.status().clone(),
                session.saved_path().map(Path::to_path_buf),
            )
        };
        info!(
            api_url = %self.config.session.api_url,
            settings = %self.config.settings_file.display(),
            folder = ?saved,
            "vaultsyncd started"
        );

        let dbus_connection = ConnectionBuilder::session()?
            .name(DBUS_NAME_SYNC)?
            .serve_at(
                DBUS_OBJECT_PATH_SYNC,
                SyncDbusService::new(Arc::clone(&self.session)),
            )?
            .build()
            .await
            .context("failed to start D-Bus object server")?;

        let signal_emitter = SignalEmitter::new(&dbus_connection, DBUS_OBJECT_PATH_SYNC)
            .context("failed to create D-Bus signal emitter")?
            .into_owned();
        let signal_handle = tokio::spawn(forward_signals(signal_emitter, status));

        self.autostart().await;

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutting down");

        signal_handle.abort();
        self.session.lock().await.stop();
        Ok(())
    }
}

/// Mirrors the status line and local-file notifications onto D-Bus signals.
async fn forward_signals(emitter: SignalEmitter<'static>, status: StatusBoard) {
    let mut status_rx = status.subscribe();
    let mut notifications = status.notifications();
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = status_rx.borrow_and_update().clone();
                if let Err(err) = SyncDbusService::sync_status(&emitter, &text).await {
                    warn!(error = %err, "failed to emit SyncStatus");
                }
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => emit_notification(&emitter, notification).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dropped local file notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn emit_notification(emitter: &SignalEmitter<'_>, notification: Notification) {
    let result = match &notification {
        Notification::LocalFileChanged {
            name,
            content,
            modified_at_ms,
        } => SyncDbusService::local_file_changed(emitter, name, content, *modified_at_ms).await,
        Notification::LocalFileDeleted { name } => {
            SyncDbusService::local_file_deleted(emitter, name).await
        }
    };
    if let Err(err) = result {
        warn!(name = notification_name(&notification), error = %err, "failed to emit file signal");
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
