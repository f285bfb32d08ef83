use anyhow::{Context, Result};
use vaultsync_integrations::ids::{DBUS_INTERFACE_SYNC, DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use vaultsync_integrations::{SessionPhase, StatusSnapshot};
use zbus::blocking::{Connection, Proxy};

/// One catalog entry as returned by `ListFiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub name: String,
    pub extension: String,
    pub uploaded_at: String,
}

pub struct SyncClient {
    connection: Connection,
}

impl SyncClient {
    pub fn connect() -> Result<Self> {
        let connection =
            Connection::session().context("failed to connect to session D-Bus for Sync1")?;
        Ok(Self { connection })
    }

    pub fn status(&self) -> Result<StatusSnapshot> {
        let (phase, text): (String, String) = self
            .proxy()?
            .call("GetStatus", &())
            .context("GetStatus failed")?;
        let phase = SessionPhase::parse(&phase)
            .with_context(|| format!("daemon reported unknown phase {phase:?}"))?;
        Ok(StatusSnapshot { phase, text })
    }

    /// `None` when the picker was cancelled.
    pub fn select_folder(&self) -> Result<Option<String>> {
        let path: String = self
            .proxy()?
            .call("SelectFolder", &())
            .context("SelectFolder failed")?;
        Ok(non_empty(path))
    }

    pub fn set_folder(&self, path: &str) -> Result<String> {
        self.proxy()?
            .call("SetFolder", &(path,))
            .context("SetFolder failed")
    }

    pub fn saved_path(&self) -> Result<Option<String>> {
        let path: String = self
            .proxy()?
            .call("GetSavedPath", &())
            .context("GetSavedPath failed")?;
        Ok(non_empty(path))
    }

    pub fn start(&self, path: Option<&str>) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("StartWatching", &(path.unwrap_or_default(),))
            .context("StartWatching failed")
    }

    pub fn stop(&self) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("StopWatching", &())
            .context("StopWatching failed")
    }

    pub fn login(&self, token: &str) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("Login", &(token,))
            .context("Login failed")
    }

    pub fn logout(&self) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("Logout", &())
            .context("Logout failed")
    }

    pub fn list_files(&self, extension: Option<&str>) -> Result<Vec<ListedFile>> {
        let rows: Vec<(String, String, String)> = self
            .proxy()?
            .call("ListFiles", &(extension.unwrap_or_default(),))
            .context("ListFiles failed")?;
        Ok(rows
            .into_iter()
            .map(|(name, extension, uploaded_at)| ListedFile {
                name,
                extension,
                uploaded_at,
            })
            .collect())
    }

    fn proxy(&self) -> Result<Proxy<'_>> {
        Proxy::new(
            &self.connection,
            DBUS_NAME_SYNC,
            DBUS_OBJECT_PATH_SYNC,
            DBUS_INTERFACE_SYNC,
        )
        .context("failed to create Sync1 proxy")
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_paths_mean_none() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("/home/me/Vault".into()).as_deref(), Some("/home/me/Vault"));
    }
}
