//! Timing scopes and the render debug log.
//!
//! [`scope`] measures a block of work and reports it on drop: always as a
//! `trace` event, and on stderr when `--perf` is on. [`log_event`] appends a
//! timestamped line to the debug log opened by [`set_debug_log_path`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Environment variable naming a render debug log path.
pub const DEBUG_LOG_ENV: &str = "MDPAPER_RENDER_DEBUG_LOG";

static PERF_TO_STDERR: AtomicBool = AtomicBool::new(false);
static DEBUG_LOG: Mutex<Option<DebugLog>> = Mutex::new(None);

/// Timer for one named stage; reports when dropped.
#[derive(Debug)]
#[must_use = "a scope measures until it is dropped"]
pub struct Scope {
    stage: &'static str,
    started: Instant,
}

impl Drop for Scope {
    fn drop(&mut self) {
        let elapsed_ms = millis_since(self.started);
        tracing::trace!(stage = self.stage, elapsed_ms, "stage finished");
        if is_enabled() {
            eprintln!("[perf] {}: {elapsed_ms:.2} ms", self.stage);
        }
    }
}

struct DebugLog {
    opened: Instant,
    out: BufWriter<File>,
}

impl DebugLog {
    fn create(path: &Path) -> io::Result<Self> {
        let mut log = Self {
            opened: Instant::now(),
            out: BufWriter::new(File::create(path)?),
        };
        writeln!(log.out, "mdpaper render debug log start")?;
        log.out.flush()?;
        Ok(log)
    }

    fn append(&mut self, event: &str, detail: &str) -> io::Result<()> {
        let at = millis_since(self.opened);
        writeln!(self.out, "[{at:>10.3} ms] {event}: {detail}")?;
        self.out.flush()
    }
}

fn millis_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn debug_log() -> MutexGuard<'static, Option<DebugLog>> {
    // A panic while logging leaves the log usable.
    DEBUG_LOG.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start timing `stage`.
pub fn scope(stage: &'static str) -> Scope {
    Scope {
        stage,
        started: Instant::now(),
    }
}

/// Turn stderr timing reports on or off.
pub fn set_enabled(enabled: bool) {
    PERF_TO_STDERR.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    PERF_TO_STDERR.load(Ordering::Relaxed)
}

/// Open (truncating) the debug log at `path`, or close it with `None`.
pub fn set_debug_log_path(path: Option<&Path>) -> io::Result<()> {
    let next = path.map(DebugLog::create).transpose()?;
    *debug_log() = next;
    Ok(())
}

pub fn is_debug_log_enabled() -> bool {
    debug_log().is_some()
}

/// Append `event` to the debug log; a no-op when none is open.
pub fn log_event(event: &str, detail: impl AsRef<str>) {
    if let Some(log) = debug_log().as_mut()
        && let Err(err) = log.append(event, detail.as_ref())
    {
        tracing::warn!(error = %err, "render debug log write failed");
    }
}
