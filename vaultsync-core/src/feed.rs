use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::client::{StoreClient, StoreError};
use crate::record::ChangeBatch;

/// Owner-scoped subscription to catalog changes.
///
/// Merges two sources: optimistic snapshots of this client's own writes
/// (flagged `has_pending_writes`) and confirmed changes polled from the
/// server's change log.
pub struct ChangeFeed {
    client: StoreClient,
    owner_id: String,
    cursor: Option<String>,
    ticker: Interval,
    local: broadcast::Receiver<ChangeBatch>,
    local_open: bool,
}

impl ChangeFeed {
    pub(crate) fn new(
        client: StoreClient,
        owner_id: String,
        poll_interval: Duration,
        local: broadcast::Receiver<ChangeBatch>,
    ) -> Self {
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            client,
            owner_id,
            cursor: None,
            ticker,
            local,
            local_open: true,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Waits for the next non-empty batch. Cancel-safe: dropping the future
    /// between polls loses nothing.
    pub async fn next_batch(&mut self) -> Result<ChangeBatch, StoreError> {
        loop {
            tokio::select! {
                biased;
                local = self.local.recv(), if self.local_open => match local {
                    Ok(batch) => {
                        if let Some(batch) = self.scope_to_owner(batch) {
                            return Ok(batch);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed dropped pending local snapshots");
                    }
                    Err(RecvError::Closed) => {
                        self.local_open = false;
                    }
                },
                _ = self.ticker.tick() => {
                    let batch = self.poll_server().await?;
                    if !batch.changes.is_empty() {
                        return Ok(batch);
                    }
                }
            }
        }
    }

    async fn poll_server(&mut self) -> Result<ChangeBatch, StoreError> {
        let page = self
            .client
            .changes(&self.owner_id, self.cursor.as_deref())
            .await?;
        debug!(
            owner = %self.owner_id,
            cursor = %page.cursor,
            changes = page.changes.len(),
            "polled change feed"
        );
        self.cursor = Some(page.cursor);
        let batch = ChangeBatch {
            has_pending_writes: false,
            changes: page.changes,
        };
        Ok(self.scope_to_owner(batch).unwrap_or(ChangeBatch {
            has_pending_writes: false,
            changes: Vec::new(),
        }))
    }

    fn scope_to_owner(&self, mut batch: ChangeBatch) -> Option<ChangeBatch> {
        batch
            .changes
            .retain(|change| change.record.owner_id == self.owner_id);
        (!batch.changes.is_empty()).then_some(batch)
    }
}
