//! Directory watcher that turns raw notifications into "file is ready" calls.
//!
//! Notifications from `notify` arrive on its own thread. They are filtered,
//! debounced and pushed into a bounded queue; a single consumer thread pops
//! them, polls the file until its size settles, and then hands it to a
//! [`StableFileHandler`]. A file that never settles within the max-wait bound
//! is abandoned without a callback.

use crate::config::{IgnoreFilter, WatcherConfig};
use crate::paths::resolve_path;
use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long the consumer blocks on the queue before rechecking for stop.
const CONSUMER_POLL: Duration = Duration::from_millis(500);
/// Size of the debounce map that triggers pruning of stale paths.
const DEBOUNCE_PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watched directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),
    #[error("Failed to watch {}: {source}", .path.display())]
    Notify {
        path: PathBuf,
        source: notify::Error,
    },
    #[error("Failed to start consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Moved,
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Moved => "moved",
        })
    }
}

/// One accepted notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEvent {
    pub event_type: FileEventKind,
    pub src_path: PathBuf,
    /// New location for `moved` events.
    pub dest_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(event_type: FileEventKind, src_path: PathBuf, dest_path: Option<PathBuf>) -> Self {
        Self {
            event_type,
            src_path,
            dest_path,
            timestamp: Utc::now(),
        }
    }

    /// The path the file lives at now.
    pub fn target(&self) -> &Path {
        self.dest_path.as_deref().unwrap_or(&self.src_path)
    }
}

/// Receiver of stabilized files.
pub trait StableFileHandler: Send + Sync {
    fn on_stable_file(&self, path: &Path, event: &FileEvent);
}

/// Watcher timing and queue limits.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherSettings {
    /// Size must stay unchanged this long.
    pub stability: Duration,
    /// Give up on a file after this long.
    pub max_wait: Duration,
    pub debounce: Duration,
    pub poll_interval: Duration,
    /// Pause after a size change before polling again.
    pub change_backoff: Duration,
    /// Pause while the file is missing.
    pub missing_backoff: Duration,
    pub queue_capacity: usize,
    /// Bound on joining the consumer during [`FileWatcher::stop`].
    pub stop_timeout: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self::from(&WatcherConfig::default())
    }
}

impl From<&WatcherConfig> for WatcherSettings {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            stability: seconds(config.stability_seconds, Duration::from_millis(1500)),
            max_wait: seconds(config.max_wait_seconds, Duration::from_secs(60)),
            debounce: seconds(config.debounce_seconds, Duration::from_secs(1)),
            poll_interval: Duration::from_millis(250),
            change_backoff: Duration::from_millis(350),
            missing_backoff: Duration::from_millis(250),
            queue_capacity: 1024,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Negative or non-finite values fall back to `default`.
fn seconds(value: f64, default: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(default)
}

/// A stop flag that sleeping threads can be woken from.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(&self) {
        *self.flag() = true;
        self.wake.notify_all();
    }

    fn reset(&self) {
        *self.flag() = false;
    }

    fn is_set(&self) -> bool {
        *self.flag()
    }

    /// Sleeps for `duration`; returns true if stop was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Polls `path` until its size has been unchanged for `settings.stability`.
///
/// Returns false if the file is abandoned (max wait exceeded, replaced by a
/// directory) or a stop is requested.
fn wait_until_stable(path: &Path, settings: &WatcherSettings, stop: &StopSignal) -> bool {
    let started = Instant::now();
    let mut last_size: Option<u64> = None;
    let mut unchanged_since = started;

    while started.elapsed() < settings.max_wait {
        if stop.is_set() {
            return false;
        }

        let pause = match fs::metadata(path) {
            Ok(metadata) if !metadata.is_file() => return false,
            Ok(metadata) => {
                let size = metadata.len();
                if last_size == Some(size) {
                    if unchanged_since.elapsed() >= settings.stability {
                        return true;
                    }
                    settings.poll_interval
                } else {
                    last_size = Some(size);
                    unchanged_since = Instant::now();
                    settings.change_backoff
                }
            }
            Err(_) => {
                last_size = None;
                settings.missing_backoff
            }
        };

        if stop.sleep(pause) {
            return false;
        }
    }

    debug!(path = %path.display(), "file never stabilized; abandoning");
    false
}

/// Maps one raw notification to the events worth stabilizing.
///
/// Creates and content changes keep their paths. Renames target the new
/// name; the rename-from half and removals are dropped.
fn file_events(event: Event) -> Vec<FileEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return match event.paths.as_slice() {
                [from, to, ..] => vec![FileEvent::new(FileEventKind::Moved, from.clone(), Some(to.clone()))],
                _ => Vec::new(),
            };
        }
        EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Moved,
        EventKind::Modify(_) => FileEventKind::Modified,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FileEvent::new(kind, path, None))
        .collect()
}

struct Shared {
    directory: PathBuf,
    handler: Arc<dyn StableFileHandler>,
    settings: WatcherSettings,
    filter: IgnoreFilter,
    stop: StopSignal,
    last_seen: Mutex<HashMap<PathBuf, Instant>>,
    queue: Mutex<Option<SyncSender<FileEvent>>>,
}

impl Shared {
    fn submit(&self, event: FileEvent) -> bool {
        if self.stop.is_set() {
            return false;
        }

        let target = event.target();
        if !self.is_direct_child(target) || self.filter.should_ignore(target) || target.is_dir() {
            return false;
        }

        if !self.debounce(&resolve_path(target)) {
            return false;
        }

        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = queue.as_ref() else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(path = %event.target().display(), "watch queue full; dropping notification");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn is_direct_child(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if parent == self.directory => true,
            Some(parent) => resolve_path(parent) == self.directory,
            None => false,
        }
    }

    /// Records `path` as seen now; false if it was seen within the window.
    fn debounce(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last_seen.insert(path.to_path_buf(), now);

        if last_seen.len() > DEBOUNCE_PRUNE_THRESHOLD {
            let horizon = self.settings.debounce.max(self.settings.max_wait);
            last_seen.retain(|_, seen| now.duration_since(*seen) < horizon);
        }

        !previous.is_some_and(|seen| now.duration_since(seen) < self.settings.debounce)
    }

    fn on_notify(&self, event: Event) {
        for file_event in file_events(event) {
            self.submit(file_event);
        }
    }

    fn consume(&self, events: Receiver<FileEvent>) {
        loop {
            if self.stop.is_set() {
                break;
            }

            let event = match events.recv_timeout(CONSUMER_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let target = event.target().to_path_buf();
            if !wait_until_stable(&target, &self.settings, &self.stop) {
                continue;
            }
            if self.stop.is_set() {
                break;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.handler.on_stable_file(&target, &event);
            }));
            if outcome.is_err() {
                error!(path = %target.display(), "stable-file handler panicked");
            }
        }
    }
}

struct Running {
    notifier: Option<RecommendedWatcher>,
    consumer: JoinHandle<()>,
    finished: Receiver<()>,
}

/// Watches one directory, non-recursively.
pub struct FileWatcher {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl FileWatcher {
    pub fn new(
        directory: &Path,
        handler: Arc<dyn StableFileHandler>,
        settings: WatcherSettings,
        filter: IgnoreFilter,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                directory: resolve_path(directory),
                handler,
                settings,
                filter,
                stop: StopSignal::default(),
                last_seen: Mutex::new(HashMap::new()),
                queue: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.shared.directory
    }

    /// Starts the consumer and subscribes to notifications.
    ///
    /// Calling `start` on a running watcher does nothing.
    pub fn start(&self) -> Result<(), WatcherError> {
        if self.lock_running().as_ref().is_some_and(|r| r.notifier.is_some()) {
            return Ok(());
        }
        self.start_consumer()?;

        let shared = Arc::clone(&self.shared);
        let subscribed = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => shared.on_notify(event),
            Err(e) => warn!(error = %e, "watch notification error"),
        })
        .and_then(|mut notifier| {
            notifier.watch(&self.shared.directory, RecursiveMode::NonRecursive)?;
            Ok(notifier)
        });

        let notifier = match subscribed {
            Ok(notifier) => notifier,
            Err(e) => {
                self.stop();
                return Err(WatcherError::Notify {
                    path: self.shared.directory.clone(),
                    source: e,
                });
            }
        };

        if let Some(running) = self.lock_running().as_mut() {
            running.notifier = Some(notifier);
        }
        info!(directory = %self.shared.directory.display(), "watcher started");
        Ok(())
    }

    /// Starts only the consumer side; events come in through [`Self::submit`].
    pub fn start_consumer(&self) -> Result<(), WatcherError> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Ok(());
        }
        if !self.shared.directory.is_dir() {
            return Err(WatcherError::DirectoryMissing(self.shared.directory.clone()));
        }

        self.shared.stop.reset();
        let (sender, receiver) = mpsc::sync_channel(self.shared.settings.queue_capacity.max(1));
        let (finished_tx, finished) = mpsc::channel();
        *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);

        let shared = Arc::clone(&self.shared);
        let consumer = thread::Builder::new()
            .name("silent-organizer-watcher".to_string())
            .spawn(move || {
                shared.consume(receiver);
                let _ = finished_tx.send(());
            })?;

        *running = Some(Running {
            notifier: None,
            consumer,
            finished,
        });
        Ok(())
    }

    /// Offers a notification as if it came from the filesystem.
    ///
    /// Returns true if it was queued for stabilization.
    pub fn submit(&self, kind: FileEventKind, src_path: PathBuf, dest_path: Option<PathBuf>) -> bool {
        self.shared.submit(FileEvent::new(kind, src_path, dest_path))
    }

    /// Stops watching and waits (bounded) for the consumer to exit.
    ///
    /// Returns false if the consumer did not finish within the stop timeout;
    /// it is then left to exit on its own.
    pub fn stop(&self) -> bool {
        let Some(mut running) = self.lock_running().take() else {
            return true;
        };

        self.shared.stop.request();
        drop(running.notifier.take());
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).take();

        match running.finished.recv_timeout(self.shared.settings.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = running.consumer.join();
                info!(directory = %self.shared.directory.display(), "watcher stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("watcher consumer did not stop in time");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
