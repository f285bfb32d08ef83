use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use vaultsync_core::{Account, StoreClient};

use super::download::LocalWriter;
use super::loop_guard::LoopGuard;
use super::status::StatusBoard;
use super::transfer::TransferClient;

pub const DEFAULT_ECHO_TOLERANCE: Duration = Duration::from_millis(2000);

/// Names with an upload past admission.
#[derive(Clone, Default)]
pub struct InFlightUploads {
    names: Arc<Mutex<HashSet<String>>>,
}

impl InFlightUploads {
    /// Claims `name`, or returns `None` when another upload already holds it.
    pub fn try_begin(&self, name: &str) -> Option<InFlightTicket> {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        names.insert(name.to_string()).then(|| InFlightTicket {
            names: Arc::clone(&self.names),
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

/// Releases the in-flight claim when dropped, whatever the upload outcome.
pub struct InFlightTicket {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Everything a pipeline needs for one active session.
pub struct SyncContext {
    pub store: StoreClient,
    pub account: Account,
    pub folder: PathBuf,
    pub writer: LocalWriter,
    pub uploads: InFlightUploads,
    pub echo_tolerance: Duration,
}

impl SyncContext {
    pub fn owner_id(&self) -> &str {
        &self.account.owner_id
    }

    pub fn actor(&self) -> Option<String> {
        self.account.email.clone()
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.writer.guard
    }

    pub fn status(&self) -> &StatusBoard {
        &self.writer.status
    }

    pub fn transfer(&self) -> &TransferClient {
        &self.writer.transfer
    }
}

pub type SharedContext = Arc<SyncContext>;
