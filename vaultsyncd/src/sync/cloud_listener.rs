use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use vaultsync_core::{ChangeBatch, ChangeFeed, ChangeKind};

use super::dispatch::SyncEvent;
use super::download::DownloadRequest;
use super::paths::local_path_for;
use super::retry::Backoff;
use super::status::StatusBoard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Download(DownloadRequest),
    DeleteLocal { name: String, target: PathBuf },
}

/// Turns a confirmed batch into local commands. Batches carrying the
/// engine's own pending writes produce nothing.
pub fn route_batch(batch: &ChangeBatch, folder: &Path) -> Vec<RemoteCommand> {
    if batch.has_pending_writes {
        return Vec::new();
    }
    batch
        .changes
        .iter()
        .filter_map(|change| {
            let record = &change.record;
            let target = match local_path_for(folder, &record.name) {
                Ok(target) => target,
                Err(err) => {
                    warn!(name = %record.name, error = %err, "skipping remote change with unusable name");
                    return None;
                }
            };
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let modified_at_ms = match record.modified_at_millis() {
                        Ok(ms) => ms,
                        Err(err) => {
                            warn!(name = %record.name, error = %err, "remote change has unreadable timestamp, keeping download time");
                            None
                        }
                    };
                    Some(RemoteCommand::Download(DownloadRequest {
                        name: record.name.clone(),
                        content_ref: record.content_ref.clone(),
                        target,
                        modified_at_ms,
                    }))
                }
                ChangeKind::Removed => Some(RemoteCommand::DeleteLocal {
                    name: record.name.clone(),
                    target,
                }),
            }
        })
        .collect()
}

/// Follows the change feed until the receiving side goes away.
pub async fn run_listener(
    mut feed: ChangeFeed,
    folder: PathBuf,
    status: StatusBoard,
    events: mpsc::UnboundedSender<SyncEvent>,
) {
    let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(10), true);
    let mut failures = 0u32;

    loop {
        let batch = match feed.next_batch().await {
            Ok(batch) => {
                failures = 0;
                batch
            }
            Err(err) => {
                warn!(owner = %feed.owner_id(), error = %err, "change feed failed");
                status.set(format!("Cloud listener error: {err}"));
                tokio::time::sleep(backoff.delay(failures)).await;
                failures = failures.saturating_add(1);
                continue;
            }
        };

        if batch.has_pending_writes {
            debug!(changes = batch.changes.len(), "ignoring pending local writes");
            continue;
        }
        status.set(format!(
            "Cloud update. Checking {} changes...",
            batch.changes.len()
        ));
        for command in route_batch(&batch, &folder) {
            if events.send(SyncEvent::Remote(command)).is_err() {
                return;
            }
        }
    }
}
