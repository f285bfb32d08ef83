use std::time::Duration;

use tracing::{debug, warn};
use vaultsync_core::{
    NewFileRecord, RecordUpdate, extension_of, format_millis, now_millis,
};

use super::SyncError;
use super::context::SyncContext;
use super::local_watcher::LocalFileEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Another upload of the same name is past admission.
    InFlight,
    /// The name is being written by the engine itself.
    Guarded,
    /// The catalog already reflects this modification time.
    UpToDate,
    Created,
    Updated,
    Failed(String),
}

/// Pushes a stable local file to the blob area and catalog. Failures are
/// reported on the status line and never propagate.
pub async fn upload_file(ctx: &SyncContext, event: LocalFileEvent) -> UploadOutcome {
    let Some(_ticket) = ctx.uploads.try_begin(&event.name) else {
        debug!(name = %event.name, "upload already in flight");
        return UploadOutcome::InFlight;
    };
    if ctx.guard().is_guarded(&event.name) {
        debug!(name = %event.name, "skipping upload of guarded file");
        return UploadOutcome::Guarded;
    }

    let name = event.name.clone();
    ctx.status().set(format!("Syncing: {name}..."));
    match push(ctx, event).await {
        Ok(outcome) => {
            match outcome {
                UploadOutcome::UpToDate => ctx.status().set(format!("Up to date: {name}")),
                UploadOutcome::Updated => ctx.status().set(format!("Synced (updated): {name}")),
                UploadOutcome::Created => ctx.status().set(format!("Synced (new): {name}")),
                _ => {}
            }
            outcome
        }
        Err(err) => {
            warn!(name = %name, error = %err, "upload failed");
            ctx.status().set(format!("Error uploading {name}: {err}"));
            UploadOutcome::Failed(err.to_string())
        }
    }
}

async fn push(ctx: &SyncContext, event: LocalFileEvent) -> Result<UploadOutcome, SyncError> {
    let owner_id = ctx.owner_id();
    let existing = ctx.store.find_record(owner_id, &event.name).await?;
    if let Some(record) = &existing {
        match record.modified_at_millis() {
            Ok(Some(remote_ms))
                if within_tolerance(event.modified_at_ms, remote_ms, ctx.echo_tolerance) =>
            {
                debug!(
                    name = %event.name,
                    local_ms = event.modified_at_ms,
                    remote_ms,
                    "local change already in catalog"
                );
                return Ok(UploadOutcome::UpToDate);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(name = %event.name, error = %err, "catalog modification time unreadable, uploading");
            }
        }
    }

    ctx.status().set(format!("Uploading: {}...", event.name));
    let blob = {
        let _permit = ctx.transfer().upload_permit().await?;
        ctx.store
            .put_blob(owner_id, &event.name, event.content)
            .await?
    };
    let modified_at = format_millis(event.modified_at_ms)?;
    let actor = ctx.actor();

    match existing {
        Some(record) => {
            let update = RecordUpdate {
                content_ref: blob.content_ref,
                modified_at,
                modified_by: actor,
            };
            ctx.store.update_record(&record, &update).await?;
            Ok(UploadOutcome::Updated)
        }
        None => {
            let record = NewFileRecord {
                extension: extension_of(&event.name),
                name: event.name,
                content_ref: blob.content_ref,
                owner_id: owner_id.to_string(),
                uploaded_at: format_millis(now_millis())?,
                uploaded_by: actor.clone(),
                modified_at,
                modified_by: actor,
            };
            ctx.store.create_record(&record).await?;
            Ok(UploadOutcome::Created)
        }
    }
}

fn within_tolerance(local_ms: i64, remote_ms: i64, tolerance: Duration) -> bool {
    u128::from(local_ms.abs_diff(remote_ms)) < tolerance.as_millis()
}
