use tokio::sync::{broadcast, watch};
use tracing::info;

const NOTIFICATION_BUFFER: usize = 256;

/// Events forwarded to the UI as D-Bus signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    LocalFileChanged {
        name: String,
        content: Vec<u8>,
        modified_at_ms: i64,
    },
    LocalFileDeleted {
        name: String,
    },
}

/// The single human-readable status line plus per-file notifications.
#[derive(Clone)]
pub struct StatusBoard {
    line: watch::Sender<String>,
    notifications: broadcast::Sender<Notification>,
}

impl StatusBoard {
    pub fn new(initial: impl Into<String>) -> Self {
        let (line, _) = watch::channel(initial.into());
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            line,
            notifications,
        }
    }

    pub fn set(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "sync status");
        self.line.send_replace(text);
    }

    pub fn current(&self) -> String {
        self.line.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.line.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new("Not syncing.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_latest_line() {
        let board = StatusBoard::default();
        let mut rx = board.subscribe();
        assert_eq!(board.current(), "Not syncing.");

        board.set("Uploading: a.xml...");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), "Uploading: a.xml...");
    }

    #[tokio::test]
    async fn notifications_fan_out() {
        let board = StatusBoard::default();
        let mut rx = board.notifications();
        board.notify(Notification::LocalFileDeleted {
            name: "a.xml".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::LocalFileDeleted {
                name: "a.xml".into()
            }
        );
    }
}
