use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::cloud_listener::RemoteCommand;
use super::context::SharedContext;
use super::delete::delete_remote;
use super::local_watcher::LocalEvent;
use super::status::Notification;
use super::upload::upload_file;

/// One entry on the session's event channel. The watcher produces `Local`,
/// the cloud listener produces `Remote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Local(LocalEvent),
    Remote(RemoteCommand),
}

/// Single consumer of the event channel. Each event runs as its own task so
/// different names proceed concurrently; aborting the dispatcher leaves
/// already-spawned work running to completion.
pub async fn run_dispatcher(ctx: SharedContext, mut events: mpsc::UnboundedReceiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { handle_event(&ctx, event).await });
    }
    debug!("event channel closed");
}

pub async fn handle_event(ctx: &SharedContext, event: SyncEvent) {
    match event {
        SyncEvent::Local(LocalEvent::Changed(file)) => {
            ctx.status().notify(Notification::LocalFileChanged {
                name: file.name.clone(),
                content: file.content.clone(),
                modified_at_ms: file.modified_at_ms,
            });
            upload_file(ctx, file).await;
        }
        SyncEvent::Local(LocalEvent::Removed { name }) => {
            ctx.status()
                .notify(Notification::LocalFileDeleted { name: name.clone() });
            delete_remote(ctx, &name).await;
        }
        SyncEvent::Local(LocalEvent::ReadFailed { name, error }) => {
            ctx.status().set(format!("Error reading {name}: {error}"));
        }
        SyncEvent::Remote(RemoteCommand::Download(request)) => {
            let _ = ctx.writer.download(&request).await;
        }
        SyncEvent::Remote(RemoteCommand::DeleteLocal { name, target }) => {
            let _ = ctx.writer.delete_local(&name, &target).await;
        }
    }
}
