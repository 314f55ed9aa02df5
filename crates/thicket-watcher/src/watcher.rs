//! Debounced filesystem change notifications.
//!
//! Every non-excluded directory under the configured roots is registered
//! with notify individually, so excluded trees such as `target/` or
//! `node_modules/` never cost a watch descriptor. Raw notifications are
//! filtered through the ignore matcher, mapped to an [`EventOp`], and held
//! per path until the path has been quiet for the debounce window.
//!
//! The notify callback never blocks. When the raw channel is full the
//! notification is dropped and the event loop rescans the roots instead,
//! reporting every file modified since the overflow.

use crate::error::WatchError;
use crate::exclude::IgnoreMatcher;
use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Quiet period before a path's pending event is emitted.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Capacity of the debounced event channel handed to callers.
pub const EVENT_BUFFER: usize = 100;

/// Default capacity of the raw notification channel.
pub const DEFAULT_NOTIFY_BUFFER: usize = 256;

/// Files modified this long before an overflow are still reported by the
/// rescan, to cover coarse filesystem timestamps.
const OVERFLOW_SLACK: Duration = Duration::from_secs(2);

/// Kind of change seen on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOp {
    Create,
    Write,
    Remove,
    Rename,
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventOp::Create => "CREATE",
            EventOp::Write => "WRITE",
            EventOp::Remove => "REMOVE",
            EventOp::Rename => "RENAME",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub op: EventOp,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, op: EventOp) -> Self {
        Self {
            path: path.into(),
            op,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Repository roots to watch.
    pub paths: Vec<PathBuf>,
    /// Gitignore-style patterns applied on top of discovered `.gitignore`s.
    pub exclude_patterns: Vec<String>,
    pub debounce: Duration,
    /// Raw notifications buffered before an overflow rescan kicks in.
    pub notify_buffer: usize,
}

impl WatcherConfig {
    pub fn new(paths: Vec<PathBuf>, exclude_patterns: Vec<String>) -> Self {
        Self {
            paths,
            exclude_patterns,
            debounce: DEFAULT_DEBOUNCE,
            notify_buffer: DEFAULT_NOTIFY_BUFFER,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_notify_buffer(mut self, notify_buffer: usize) -> Self {
        self.notify_buffer = notify_buffer;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records that raw notifications were dropped.
#[derive(Default)]
struct Overflow {
    since: Mutex<Option<SystemTime>>,
    wake: Notify,
}

impl Overflow {
    fn mark(&self) {
        let mut since = lock(&self.since);
        if since.is_none() {
            let now = SystemTime::now();
            *since = Some(now.checked_sub(OVERFLOW_SLACK).unwrap_or(now));
            self.wake.notify_one();
        }
    }

    fn take(&self) -> Option<SystemTime> {
        lock(&self.since).take()
    }
}

/// Hands a notification to the event loop. Runs on notify's thread, so it
/// must not wait for the receiver.
fn forward(tx: &mpsc::Sender<notify::Result<Event>>, overflow: &Overflow, res: notify::Result<Event>) {
    match tx.try_send(res) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => overflow.mark(),
        Err(TrySendError::Closed(_)) => {}
    }
}

#[derive(Debug, Default)]
struct Registered {
    dirs: usize,
    files: Vec<PathBuf>,
}

/// Roots, rules and the notify handle shared with the event loop.
struct WatchTree {
    roots: Vec<PathBuf>,
    matcher: IgnoreMatcher,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl WatchTree {
    /// Registers `top` and every non-excluded directory below it, and lists
    /// the files found in them once they are watched. Blocking.
    ///
    /// The lock is only held while adding watches, never while walking.
    fn register(&self, top: &Path) -> Result<Registered, notify::Error> {
        let mut registered = Registered::default();
        let mut pending = vec![top.to_path_buf()];

        while let Some(next) = pending.pop() {
            let dirs: Vec<PathBuf> = WalkDir::new(&next)
                .into_iter()
                .filter_entry(|e| e.file_type().is_dir() && !self.matcher.matched(e.path(), true))
                .filter_map(Result::ok)
                .map(walkdir::DirEntry::into_path)
                .collect();

            {
                let mut guard = lock(&self.watcher);
                let Some(watcher) = guard.as_mut() else {
                    return Ok(registered);
                };
                for dir in &dirs {
                    watcher.watch(dir, RecursiveMode::NonRecursive)?;
                }
            }
            registered.dirs += dirs.len();

            // Entries created while walking show up here, not as events.
            let known: HashSet<&PathBuf> = dirs.iter().collect();
            for dir in &dirs {
                let Ok(entries) = fs::read_dir(dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let Ok(kind) = entry.file_type() else {
                        continue;
                    };
                    let path = entry.path();
                    if self.matcher.matched(&path, kind.is_dir()) {
                        continue;
                    }
                    if kind.is_dir() && !known.contains(&path) {
                        pending.push(path);
                    } else if kind.is_file() {
                        registered.files.push(path);
                    }
                }
            }
        }
        Ok(registered)
    }

    /// Re-registers every root and returns the files modified at or after
    /// `since`. Removals during an overflow are not recovered.
    fn rescan(&self, since: SystemTime) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for root in &self.roots {
            match self.register(root) {
                Ok(registered) => changed.extend(registered.files.into_iter().filter(|file| {
                    fs::metadata(file)
                        .and_then(|m| m.modified())
                        .is_ok_and(|modified| modified >= since)
                })),
                Err(e) => warn!("Failed to rescan {}: {}", root.display(), e),
            }
        }
        changed
    }
}

/// Watches repository roots and produces debounced [`ChangeEvent`]s.
pub struct ChangeWatcher {
    config: WatcherConfig,
    tree: Arc<WatchTree>,
}

impl ChangeWatcher {
    /// Validates the roots and loads ignore rules. Nothing is watched until
    /// [`start`](Self::start).
    pub fn new(config: WatcherConfig) -> Result<Self, WatchError> {
        if let Some(bad) = config.paths.iter().find(|p| !p.is_dir()) {
            return Err(WatchError::NotADirectory(bad.clone()));
        }

        let mut matcher =
            IgnoreMatcher::new(config.paths.clone(), config.exclude_patterns.clone());
        matcher.load();

        Ok(Self {
            tree: Arc::new(WatchTree {
                roots: config.paths.clone(),
                matcher,
                watcher: Mutex::new(None),
            }),
            config,
        })
    }

    pub fn matcher(&self) -> &IgnoreMatcher {
        &self.tree.matcher
    }

    /// Registers every directory and spawns the event loop. Must be called
    /// from within a tokio runtime.
    ///
    /// The returned stream ends when `cancel` fires or the watcher is
    /// closed. Pending events are dropped in both cases.
    pub async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ChangeEvent>, WatchError> {
        let (raw_tx, raw_rx) = mpsc::channel(self.config.notify_buffer.max(1));
        let overflow = Arc::new(Overflow::default());
        let watcher = {
            let overflow = Arc::clone(&overflow);
            notify::recommended_watcher(move |res| forward(&raw_tx, &overflow, res))?
        };
        *lock(&self.tree.watcher) = Some(watcher);

        let tree = Arc::clone(&self.tree);
        let dirs = task::spawn_blocking(move || -> Result<usize, notify::Error> {
            let mut dirs = 0;
            for root in &tree.roots {
                dirs += tree.register(root)?.dirs;
            }
            Ok(dirs)
        })
        .await??;
        info!(
            "Watching {} directories under {} roots",
            dirs,
            self.config.paths.len()
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let debouncer = Debouncer::new(self.config.debounce, tx, cancel.clone());
        tokio::spawn(event_loop(
            raw_rx,
            overflow,
            debouncer,
            Arc::clone(&self.tree),
            cancel,
        ));
        Ok(rx)
    }

    /// Stops watching. Safe to call more than once.
    pub fn close(&self) {
        let watcher = lock(&self.tree.watcher).take();
        if watcher.is_some() {
            debug!("Watcher closed");
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn event_loop(
    mut raw: mpsc::Receiver<notify::Result<Event>>,
    overflow: Arc<Overflow>,
    debouncer: Debouncer,
    tree: Arc<WatchTree>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Watcher cancelled");
                break;
            }
            _ = overflow.wake.notified() => {
                let Some(since) = overflow.take() else {
                    continue;
                };
                warn!("Notification buffer overflowed, rescanning watched roots");
                let scan = Arc::clone(&tree);
                match task::spawn_blocking(move || scan.rescan(since)).await {
                    Ok(changed) => {
                        debug!("Rescan found {} modified files", changed.len());
                        for path in changed {
                            debouncer.push(ChangeEvent::new(path, EventOp::Write));
                        }
                    }
                    Err(e) => warn!("Rescan failed: {}", e),
                }
            }
            res = raw.recv() => {
                let event = match res {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!("Watch error: {}", e);
                        continue;
                    }
                    None => {
                        debug!("Notification channel closed");
                        break;
                    }
                };

                for (path, op) in convert(&event) {
                    if tree.matcher.is_match(&path) {
                        trace!("Ignoring {}", path.display());
                        continue;
                    }
                    if op == EventOp::Create && path.is_dir() {
                        let scan = Arc::clone(&tree);
                        let dir = path.clone();
                        match task::spawn_blocking(move || scan.register(&dir)).await {
                            Ok(Ok(registered)) => {
                                for file in registered.files {
                                    debouncer.push(ChangeEvent::new(file, EventOp::Create));
                                }
                            }
                            Ok(Err(e)) => warn!("Failed to watch new directory {}: {}", path.display(), e),
                            Err(e) => warn!("Failed to watch new directory {}: {}", path.display(), e),
                        }
                    }
                    debouncer.push(ChangeEvent::new(path, op));
                }
            }
        }
    }
    debouncer.stop();
}

/// Maps a raw notification to zero or more `(path, op)` pairs.
fn convert(event: &Event) -> Vec<(PathBuf, EventOp)> {
    let all = |op: EventOp| -> Vec<(PathBuf, EventOp)> {
        event.paths.iter().map(|p| (p.clone(), op)).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(EventOp::Create),
        EventKind::Remove(_) => all(EventOp::Remove),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => all(EventOp::Rename),
            RenameMode::To => all(EventOp::Create),
            RenameMode::Both => match event.paths.as_slice() {
                [from, to] => vec![(from.clone(), EventOp::Rename), (to.clone(), EventOp::Create)],
                _ => all(EventOp::Rename),
            },
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|p| {
                    let op = if p.exists() {
                        EventOp::Create
                    } else {
                        EventOp::Rename
                    };
                    (p.clone(), op)
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(EventOp::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

struct Pending {
    event: ChangeEvent,
    generation: u64,
    timer: JoinHandle<()>,
}

/// Per-path debounce. The newest event for a path replaces the pending one
/// and re-arms its timer; a timer only emits if its generation is still
/// the current one for that path.
#[derive(Clone)]
struct Debouncer {
    window: Duration,
    out: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
    pending: Arc<Mutex<HashMap<PathBuf, Pending>>>,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    fn new(window: Duration, out: mpsc::Sender<ChangeEvent>, cancel: CancellationToken) -> Self {
        Self {
            window,
            out,
            cancel,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn push(&self, event: ChangeEvent) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let path = event.path.clone();

        let mut pending = lock(&self.pending);
        if let Some(old) = pending.remove(&path) {
            old.timer.abort();
        }

        let this = self.clone();
        let key = path.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            this.fire(&key, generation).await;
        });
        pending.insert(
            path,
            Pending {
                event,
                generation,
                timer,
            },
        );
    }

    async fn fire(&self, path: &Path, generation: u64) {
        let event = {
            let mut pending = lock(&self.pending);
            match pending.get(path) {
                Some(p) if p.generation == generation => pending.remove(path).map(|p| p.event),
                _ => None,
            }
        };
        let Some(event) = event else {
            return;
        };

        trace!("Emitting {} {}", event.op, event.path.display());
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            res = self.out.send(event) => {
                if res.is_err() {
                    debug!("Event receiver dropped");
                }
            }
        }
    }

    /// Drops every pending event without emitting it.
    fn stop(&self) {
        let mut pending = lock(&self.pending);
        for (_, p) in pending.drain() {
            p.timer.abort();
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::fs;
    use tempfile::tempdir;
    use tokio::time::{sleep, timeout};

    fn ops(event: Event) -> Vec<EventOp> {
        convert(&event).into_iter().map(|(_, op)| op).collect()
    }

    #[test]
    fn test_convert_ops() {
        let p = PathBuf::from("/repo/a.rs");
        let ev = |kind| Event::new(kind).add_path(p.clone());

        assert_eq!(ops(ev(EventKind::Create(CreateKind::File))), vec![EventOp::Create]);
        assert_eq!(
            ops(ev(EventKind::Modify(ModifyKind::Data(DataChange::Content)))),
            vec![EventOp::Write]
        );
        assert_eq!(ops(ev(EventKind::Modify(ModifyKind::Any))), vec![EventOp::Write]);
        assert_eq!(ops(ev(EventKind::Remove(RemoveKind::File))), vec![EventOp::Remove]);
        assert_eq!(
            ops(ev(EventKind::Modify(ModifyKind::Name(RenameMode::From)))),
            vec![EventOp::Rename]
        );
        assert_eq!(
            ops(ev(EventKind::Modify(ModifyKind::Name(RenameMode::To)))),
            vec![EventOp::Create]
        );
        assert!(ops(ev(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))).is_empty());
        assert!(ops(ev(EventKind::Any)).is_empty());
    }

    #[test]
    fn test_convert_rename_both() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/repo/old.rs"))
            .add_path(PathBuf::from("/repo/new.rs"));

        let pairs = convert(&event);
        assert_eq!(
            pairs,
            vec![
                (PathBuf::from("/repo/old.rs"), EventOp::Rename),
                (PathBuf::from("/repo/new.rs"), EventOp::Create),
            ]
        );
    }

    #[tokio::test]
    async fn test_debounce_collapses_bursts() {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE, tx, CancellationToken::new());

        for i in 0..5 {
            let op = if i == 0 { EventOp::Create } else { EventOp::Write };
            debouncer.push(ChangeEvent::new("/repo/a.rs", op));
            sleep(Duration::from_millis(10)).await;
        }
        debouncer.push(ChangeEvent::new("/repo/b.rs", EventOp::Remove));

        sleep(Duration::from_millis(400)).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        let a = events.iter().find(|e| e.path == Path::new("/repo/a.rs")).unwrap();
        assert_eq!(a.op, EventOp::Write);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_drops_pending() {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE, tx, cancel.clone());

        debouncer.push(ChangeEvent::new("/repo/a.rs", EventOp::Write));
        cancel.cancel();
        debouncer.stop();
        drop(debouncer);

        sleep(Duration::from_millis(250)).await;
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig::new(vec![dir.path().join("missing")], Vec::new());
        assert!(matches!(
            ChangeWatcher::new(config),
            Err(WatchError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_forward_never_waits_for_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let overflow = Overflow::default();
        let event = || Ok(Event::new(EventKind::Create(CreateKind::File)));

        forward(&tx, &overflow, event());
        assert!(overflow.take().is_none());

        forward(&tx, &overflow, event());
        forward(&tx, &overflow, event());
        let since = overflow.take().expect("overflow recorded");
        assert!(since <= SystemTime::now());
        assert!(overflow.take().is_none());

        assert!(rx.try_recv().is_ok());
        drop(rx);
        forward(&tx, &overflow, event());
        assert!(overflow.take().is_none());
    }

    fn tree(root: &Path, patterns: Vec<String>) -> WatchTree {
        let mut matcher = IgnoreMatcher::new(vec![root.to_path_buf()], patterns);
        matcher.load();
        let watcher = notify::recommended_watcher(|_: notify::Result<Event>| {}).unwrap();
        WatchTree {
            roots: vec![root.to_path_buf()],
            matcher,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    #[test]
    fn test_register_lists_files_in_watched_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        fs::write(dir.path().join("src/nested/mod.rs"), "").unwrap();
        fs::write(dir.path().join("target/out.rs"), "").unwrap();
        fs::write(dir.path().join("debug.log"), "").unwrap();

        let tree = tree(dir.path(), vec!["target/".to_string(), "*.log".to_string()]);
        let registered = tree.register(dir.path()).unwrap();
        assert_eq!(registered.dirs, 3);

        let mut files = registered.files;
        files.sort();
        assert_eq!(
            files,
            vec![dir.path().join("src/lib.rs"), dir.path().join("src/nested/mod.rs")]
        );

        *lock(&tree.watcher) = None;
        assert_eq!(tree.register(dir.path()).unwrap().dirs, 0);
    }

    #[test]
    fn test_rescan_reports_files_modified_since() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.rs"), "").unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let since = SystemTime::now();
        std::thread::sleep(Duration::from_millis(1100));
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/new.rs"), "").unwrap();
        fs::write(dir.path().join("touched.rs"), "").unwrap();

        let tree = tree(dir.path(), Vec::new());
        let mut changed = tree.rescan(since);
        changed.sort();
        assert_eq!(
            changed,
            vec![dir.path().join("sub/new.rs"), dir.path().join("touched.rs")]
        );
    }

    async fn next_named(rx: &mut mpsc::Receiver<ChangeEvent>, name: &str) -> Option<ChangeEvent> {
        timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event.path.file_name().is_some_and(|n| n == name) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn test_watcher_reports_changes() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        let config = WatcherConfig::new(
            vec![dir.path().to_path_buf()],
            vec!["*.log".to_string(), "target".to_string()],
        );
        let watcher = ChangeWatcher::new(config).unwrap();
        let cancel = CancellationToken::new();
        let mut rx = watcher.start(cancel.clone()).await.unwrap();

        fs::write(dir.path().join("debug.log"), "noise").unwrap();
        fs::write(dir.path().join("target/out.rs"), "fn x() {}").unwrap();
        fs::write(dir.path().join("lib.rs"), "fn main() {}").unwrap();

        let event = next_named(&mut rx, "lib.rs").await.expect("lib.rs event");
        assert!(matches!(event.op, EventOp::Create | EventOp::Write));

        // A directory created after start is picked up.
        fs::create_dir(dir.path().join("sub")).unwrap();
        sleep(Duration::from_millis(200)).await;
        fs::write(dir.path().join("sub/mod.rs"), "fn y() {}").unwrap();
        assert!(next_named(&mut rx, "mod.rs").await.is_some());

        cancel.cancel();
        watcher.close();
        watcher.close();
        let rest = timeout(Duration::from_secs(5), async {
            let mut names = Vec::new();
            while let Some(e) = rx.recv().await {
                names.push(e.path);
            }
            names
        })
        .await
        .unwrap();
        assert!(rest.iter().all(|p| p.extension().map_or(true, |e| e != "log")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_with_small_buffer_loses_no_files() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig::new(vec![dir.path().to_path_buf()], Vec::new())
            .with_notify_buffer(2);
        let watcher = ChangeWatcher::new(config).unwrap();
        let cancel = CancellationToken::new();
        let mut rx = timeout(Duration::from_secs(5), watcher.start(cancel.clone()))
            .await
            .expect("start finished")
            .unwrap();

        let mut expected = HashSet::new();
        for d in 0..10 {
            let sub = dir.path().join(format!("d{}", d));
            fs::create_dir(&sub).unwrap();
            for f in 0..3 {
                let name = format!("d{}_{}.rs", d, f);
                fs::write(sub.join(&name), "fn x() {}").unwrap();
                expected.insert(name);
            }
        }
        for f in 0..40 {
            let name = format!("top_{}.rs", f);
            fs::write(dir.path().join(&name), "fn y() {}").unwrap();
            expected.insert(name);
        }

        let seen = timeout(Duration::from_secs(10), async {
            let mut seen = HashSet::new();
            while let Some(event) = rx.recv().await {
                if let Some(name) = event.path.file_name().and_then(|n| n.to_str()) {
                    if expected.contains(name) {
                        seen.insert(name.to_string());
                    }
                }
                if seen.len() == expected.len() {
                    break;
                }
            }
            seen
        })
        .await
        .expect("all files reported");
        assert_eq!(seen.len(), expected.len());

        cancel.cancel();
        watcher.close();
    }
}
