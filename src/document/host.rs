//! Collaborators supplied by the embedding application, and the save/close
//! flows that need them.
//!
//! The session never talks to the user or the file system directly; a host
//! provides dialogs, [`Storage`] provides bytes, and a [`PdfRenderer`] turns
//! printable HTML into a PDF.

use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Result, Session};
use crate::print::PaperSize;

/// Byte-level file access.
pub trait Storage {
    fn read_file_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write_file_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// [`Storage`] backed by the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn read_file_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes)
    }
}

/// Answer to "save changes before closing?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardChoice {
    Save,
    Discard,
    Cancel,
}

/// User-facing dialogs.
pub trait Host {
    /// Ask for a file to open; `None` if cancelled.
    fn open_file_dialog(&mut self) -> Option<PathBuf>;
    /// Ask for a save target; `None` if cancelled.
    fn save_file_dialog(&mut self, suggested_name: &str) -> Option<PathBuf>;
    /// Ask what to do with unsaved changes in `document`.
    fn confirm_discard_changes(&mut self, document: &str) -> DiscardChoice;
}

/// Renders standalone HTML to PDF bytes.
pub trait PdfRenderer {
    type Error: Display;

    fn render_to_pdf(&mut self, html: &str, paper: PaperSize) -> std::result::Result<Vec<u8>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    /// The user dismissed the save dialog.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The document is still open, either by choice or because saving was cancelled.
    KeptOpen,
}

/// Save to the current path, or ask for one if the document was never saved.
pub fn save_or_prompt(
    session: &mut Session,
    host: &mut impl Host,
    storage: &mut impl Storage,
) -> Result<SaveOutcome> {
    match session.path().map(Path::to_path_buf) {
        Some(path) => {
            session.save(&path, storage)?;
            Ok(SaveOutcome::Saved(path))
        }
        None => save_as(session, host, storage),
    }
}

/// Ask for a path and save there.
pub fn save_as(
    session: &mut Session,
    host: &mut impl Host,
    storage: &mut impl Storage,
) -> Result<SaveOutcome> {
    let Some(path) = host.save_file_dialog(&session.display_name()) else {
        debug!("save dialog cancelled");
        return Ok(SaveOutcome::Cancelled);
    };
    session.save(&path, storage)?;
    Ok(SaveOutcome::Saved(path))
}

/// Ask for a file and load it. Returns `false` if the dialog was cancelled.
pub fn open_with_dialog(
    session: &mut Session,
    host: &mut impl Host,
    storage: &impl Storage,
) -> Result<bool> {
    let Some(path) = host.open_file_dialog() else {
        debug!("open dialog cancelled");
        return Ok(false);
    };
    let outcome = session.open(&path, storage)?;
    if !outcome.missing_images.is_empty() {
        info!(missing = ?outcome.missing_images, "opened with missing images");
    }
    Ok(true)
}

/// Close the document, resolving unsaved changes with the host first.
///
/// A failed save leaves the document open and returns the error.
pub fn request_close(
    session: &mut Session,
    host: &mut impl Host,
    storage: &mut impl Storage,
) -> Result<CloseOutcome> {
    if session.is_modified() {
        match host.confirm_discard_changes(&session.display_name()) {
            DiscardChoice::Cancel => return Ok(CloseOutcome::KeptOpen),
            DiscardChoice::Discard => {}
            DiscardChoice::Save => {
                if save_or_prompt(session, host, storage)? == SaveOutcome::Cancelled {
                    return Ok(CloseOutcome::KeptOpen);
                }
            }
        }
    }
    session.close();
    Ok(CloseOutcome::Closed)
}
