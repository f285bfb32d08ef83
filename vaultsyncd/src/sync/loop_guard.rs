use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_GRACE: Duration = Duration::from_millis(2000);

#[derive(Debug, Default)]
struct GuardEntry {
    holders: u32,
    until: Option<Instant>,
}

impl GuardEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.holders > 0 || self.until.is_some_and(|until| now < until)
    }
}

/// Names currently being written or deleted by the engine itself.
///
/// A name stays guarded while any pipeline holds it and for the grace window
/// after the last release. Expired entries are dropped lazily on lookup.
#[derive(Clone)]
pub struct LoopGuard {
    entries: Arc<Mutex<HashMap<String, GuardEntry>>>,
    grace: Duration,
}

impl LoopGuard {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn guard(&self, name: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(name.to_string()).or_default().holders += 1;
    }

    pub fn is_guarded(&self, name: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(name) {
            Some(entry) if entry.is_live(now) => true,
            Some(_) => {
                entries.remove(name);
                false
            }
            None => false,
        }
    }

    /// Drops one hold on `name` and extends its expiry to now + grace. The
    /// expiry never moves backwards.
    pub fn release(&self, name: &str) {
        let deadline = Instant::now() + self.grace;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(name.to_string()).or_default();
        entry.holders = entry.holders.saturating_sub(1);
        entry.until = Some(entry.until.map_or(deadline, |until| until.max(deadline)));
    }

    /// Forgets every entry nobody holds. Held names stay until their holder
    /// releases them.
    pub fn drain(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.holders > 0);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn release_keeps_name_guarded_for_grace_window() {
        let guard = LoopGuard::new(Duration::from_millis(2000));
        guard.guard("a.xml");
        assert!(guard.is_guarded("a.xml"));

        guard.release("a.xml");
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(guard.is_guarded("a.xml"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!guard.is_guarded("a.xml"));
        assert_eq!(guard.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_release_takes_latest_expiry() {
        let guard = LoopGuard::new(Duration::from_millis(2000));
        guard.guard("a.xml");
        guard.release("a.xml");
        tokio::time::advance(Duration::from_millis(1500)).await;
        guard.release("a.xml");
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(guard.is_guarded("a.xml"));
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!guard.is_guarded("a.xml"));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_holders_need_both_releases() {
        let guard = LoopGuard::new(Duration::from_millis(2000));
        guard.guard("a.xml");
        guard.guard("a.xml");
        guard.release("a.xml");
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(guard.is_guarded("a.xml"));

        guard.release("a.xml");
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(guard.is_guarded("a.xml"));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!guard.is_guarded("a.xml"));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_keeps_held_names() {
        let guard = LoopGuard::new(Duration::from_millis(2000));
        guard.guard("held.xml");
        guard.guard("done.xml");
        guard.release("done.xml");

        guard.drain();

        assert!(guard.is_guarded("held.xml"));
        assert!(!guard.is_guarded("done.xml"));
    }

    #[test]
    fn unknown_names_are_not_guarded() {
        let guard = LoopGuard::default();
        assert!(!guard.is_guarded("missing.xml"));
    }
}
