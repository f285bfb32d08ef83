use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::dispatch::SyncEvent;
use super::file_times::system_time_to_millis;
use super::loop_guard::LoopGuard;
use super::paths::{is_partial, name_for};
use super::retry::{RetryPolicy, retry_transient};

/// A stable local file, read in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEvent {
    pub path: PathBuf,
    pub name: String,
    pub content: Vec<u8>,
    pub modified_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Changed(LocalFileEvent),
    Removed { name: String },
    ReadFailed { name: String, error: String },
}

#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    pub stable_for: Duration,
    pub poll_every: Duration,
    pub retry: RetryPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stable_for: Duration::from_millis(1500),
            poll_every: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Raw notification, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawChange {
    Touched(PathBuf),
    Removed(PathBuf),
    /// Rename with no direction; resolved by checking whether the path exists.
    Renamed(PathBuf),
}

/// Recursive watch over the sync folder. Dropping it stops the watch.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl LocalWatcher {
    pub fn start(
        root: &Path,
        config: WatchConfig,
        guard: LoopGuard,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> notify::Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for change in map_event(event) {
                        let _ = raw_tx.send(change);
                    }
                }
                Err(err) => warn!(error = %err, "file watcher error"),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(run(root.to_path_buf(), config, guard, raw_rx, events));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn map_event(event: Event) -> Vec<RawChange> {
    let paths = event.paths.into_iter().filter(|path| !is_partial(path));
    match event.kind {
        EventKind::Create(CreateKind::Folder) => paths.map(RawChange::Touched).collect(),
        EventKind::Remove(RemoveKind::Folder) => paths.map(RawChange::Removed).collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(RawChange::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(RawChange::Touched).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // notify reports [from, to]; a filtered partial source leaves only `to`.
            let mut all: Vec<PathBuf> = paths.collect();
            match all.len() {
                0 => Vec::new(),
                1 => vec![RawChange::Touched(all.remove(0))],
                _ => {
                    let to = all.remove(1);
                    let from = all.remove(0);
                    vec![RawChange::Removed(from), RawChange::Touched(to)]
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths.map(RawChange::Renamed).collect(),
        EventKind::Create(_) | EventKind::Modify(_) => paths.map(RawChange::Touched).collect(),
        EventKind::Remove(_) => paths.map(RawChange::Removed).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    File(Snapshot),
    NotAFile,
}

#[derive(Debug)]
struct PendingFile {
    last: Option<Snapshot>,
    since: Instant,
}

/// Holds touched files until their size and mtime stop changing.
#[derive(Debug)]
struct Debouncer {
    pending: HashMap<PathBuf, PendingFile>,
    stable_for: Duration,
}

impl Debouncer {
    fn new(stable_for: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            stable_for,
        }
    }

    fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.entry(path).or_insert(PendingFile {
            last: None,
            since: now,
        });
    }

    /// Drops `path` and, for a directory, everything pending under it.
    fn forget_under(&mut self, path: &Path) {
        self.pending.retain(|pending, _| !pending.starts_with(path));
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.pending.keys().cloned().collect()
    }

    /// Records a probe of `path`. Returns true once the file has been
    /// unchanged for the stability window; the entry is then dropped.
    fn observe(&mut self, path: &Path, probe: Probe, now: Instant) -> bool {
        let Some(entry) = self.pending.get_mut(path) else {
            return false;
        };
        let snapshot = match probe {
            Probe::File(snapshot) => snapshot,
            Probe::NotAFile => {
                self.pending.remove(path);
                return false;
            }
        };
        if entry.last != Some(snapshot) {
            entry.last = Some(snapshot);
            entry.since = now;
            return false;
        }
        if now.duration_since(entry.since) >= self.stable_for {
            self.pending.remove(path);
            return true;
        }
        false
    }
}

/// Names of files seen under the root. A removed directory leaves no trace
/// on disk, so its files are recovered from here.
#[derive(Debug, Default)]
struct KnownFiles {
    names: BTreeSet<String>,
}

impl KnownFiles {
    fn insert(&mut self, name: String) {
        self.names.insert(name);
    }

    /// Names that disappeared with `name`: the file itself, every known file
    /// below it when it was a directory, or `name` alone if never seen.
    fn remove(&mut self, name: &str) -> Vec<String> {
        if self.names.remove(name) {
            return vec![name.to_string()];
        }
        let prefix = format!("{name}/");
        let nested: Vec<String> = self
            .names
            .range(prefix.clone()..)
            .take_while(|known| known.starts_with(&prefix))
            .cloned()
            .collect();
        if nested.is_empty() {
            return vec![name.to_string()];
        }
        for known in &nested {
            self.names.remove(known);
        }
        nested
    }
}

/// Every regular file at or below `path`, skipping download temporaries.
async fn files_under(path: PathBuf) -> Vec<PathBuf> {
    let walk = tokio::task::spawn_blocking(move || {
        WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| !is_partial(path))
            .collect()
    });
    match walk.await {
        Ok(files) => files,
        Err(err) => {
            warn!(error = %err, "directory scan failed");
            Vec::new()
        }
    }
}

async fn probe(path: &Path) -> Probe {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Probe::File(Snapshot {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }),
        Ok(_) => Probe::NotAFile,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "pending file vanished");
            Probe::NotAFile
        }
    }
}

async fn run(
    root: PathBuf,
    config: WatchConfig,
    guard: LoopGuard,
    mut raw_rx: mpsc::UnboundedReceiver<RawChange>,
    events: mpsc::UnboundedSender<SyncEvent>,
) {
    let mut debouncer = Debouncer::new(config.stable_for);
    let mut known = KnownFiles::default();
    for path in files_under(root.clone()).await {
        if let Ok(name) = name_for(&root, &path) {
            known.insert(name);
        }
    }
    let mut ticker = tokio::time::interval(config.poll_every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                match resolve_rename(raw).await {
                    RawChange::Touched(path) => {
                        let is_dir = tokio::fs::metadata(&path)
                            .await
                            .is_ok_and(|metadata| metadata.is_dir());
                        if is_dir {
                            let now = Instant::now();
                            for file in files_under(path).await {
                                debouncer.touch(file, now);
                            }
                        } else {
                            debouncer.touch(path, Instant::now());
                        }
                    }
                    RawChange::Removed(path) => {
                        debouncer.forget_under(&path);
                        let Ok(name) = name_for(&root, &path) else { continue };
                        for name in known.remove(&name) {
                            emit_removed(name, &guard, &events);
                        }
                    }
                    RawChange::Renamed(_) => {}
                }
            }
            _ = ticker.tick(), if !debouncer.is_empty() => {
                for path in debouncer.paths() {
                    let probe = probe(&path).await;
                    if debouncer.observe(&path, probe, Instant::now()) {
                        if let Ok(name) = name_for(&root, &path) {
                            known.insert(name);
                        }
                        emit_changed(&root, path, &guard, config.retry, &events);
                    }
                }
            }
        }
    }
}

async fn resolve_rename(raw: RawChange) -> RawChange {
    match raw {
        RawChange::Renamed(path) => {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                RawChange::Touched(path)
            } else {
                RawChange::Removed(path)
            }
        }
        other => other,
    }
}

fn emit_removed(name: String, guard: &LoopGuard, events: &mpsc::UnboundedSender<SyncEvent>) {
    if guard.is_guarded(&name) {
        debug!(name = %name, "suppressed removal of guarded file");
        return;
    }
    let _ = events.send(SyncEvent::Local(LocalEvent::Removed { name }));
}

fn emit_changed(
    root: &Path,
    path: PathBuf,
    guard: &LoopGuard,
    retry: RetryPolicy,
    events: &mpsc::UnboundedSender<SyncEvent>,
) {
    let Ok(name) = name_for(root, &path) else {
        return;
    };
    if guard.is_guarded(&name) {
        debug!(name = %name, "suppressed change of guarded file");
        return;
    }
    let events = events.clone();
    tokio::spawn(async move {
        let read = retry_transient(retry, || read_file(path.clone())).await;
        let event = match read {
            Ok((content, modified_at_ms)) => LocalEvent::Changed(LocalFileEvent {
                path,
                name,
                content,
                modified_at_ms,
            }),
            Err(err) => {
                warn!(name = %name, error = %err, "failed to read changed file");
                LocalEvent::ReadFailed {
                    name,
                    error: err.to_string(),
                }
            }
        };
        let _ = events.send(SyncEvent::Local(event));
    });
}

async fn read_file(path: PathBuf) -> std::io::Result<(Vec<u8>, i64)> {
    let content = tokio::fs::read(&path).await?;
    let modified = tokio::fs::metadata(&path).await?.modified()?;
    Ok((content, system_time_to_millis(modified)))
}
