//! Source file watching for `--watch`.
//!
//! The parent directory is watched rather than the file itself, since
//! editors commonly save by writing a temporary file and renaming it over
//! the original.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

/// How often [`SourceWatcher::wait_for_change`] polls for events.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default quiet period after the last event before a change is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches one document and reports debounced changes to it.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    watch_root: PathBuf,
    source: PathBuf,
    source_name: Option<OsString>,
    debounce: Duration,
    pending_since: Option<Instant>,
}

impl SourceWatcher {
    /// Start watching `path`.
    ///
    /// # Errors
    /// Returns an error if the platform watcher cannot be created or the
    /// parent directory cannot be watched.
    pub fn new(path: impl AsRef<Path>, debounce: Duration) -> notify::Result<Self> {
        // Event paths arrive canonical; compare against the canonical form.
        let source = path
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        let source_name = source.file_name().map(std::ffi::OsStr::to_os_string);
        let watch_root = watch_root_for(&source);

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;
        debug!(source = %source.display(), root = %watch_root.display(), "watching source");

        Ok(Self {
            _watcher: watcher,
            rx,
            watch_root,
            source,
            source_name,
            debounce,
            pending_since: None,
        })
    }

    /// Canonical path of the watched document.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Drain pending events; true once a change has settled for the debounce period.
    pub fn take_change_ready(&mut self) -> bool {
        let mut relevant = 0u32;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(ev) if self.is_relevant(&ev) => relevant += 1,
                Ok(ev) => trace!(kind = ?ev.kind, paths = ?ev.paths, "ignoring unrelated event"),
                Err(err) => warn!(error = %err, "file watcher error"),
            }
        }

        if relevant > 0 {
            crate::perf::log_event("watcher.change", format!("events={relevant}"));
            self.pending_since = Some(Instant::now());
        }

        match self.pending_since {
            Some(since) if since.elapsed() >= self.debounce => {
                self.pending_since = None;
                true
            }
            _ => false,
        }
    }

    /// Block until a settled change arrives or `timeout` passes.
    pub fn wait_for_change(&mut self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.take_change_ready() {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event.paths.iter().any(|path| {
            path == &self.watch_root
                || path == &self.source
                || self
                    .source_name
                    .as_ref()
                    .is_some_and(|name| path.file_name().is_some_and(|f| f == name))
        })
    }
}

fn watch_root_for(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
