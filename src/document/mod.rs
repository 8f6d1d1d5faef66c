//! Open document state.
//!
//! This module handles:
//! - The [`Session`] state machine (load, edit, save, close)
//! - Decoding files into a [`DecodedDocument`] off the session's thread
//! - Host-facing save and close flows in [`host`]

pub mod host;
mod session;

use std::path::{Path, PathBuf};

pub use host::{
    CloseOutcome, DiscardChoice, FsStorage, Host, PdfRenderer, SaveOutcome, Storage,
    open_with_dialog, request_close, save_as, save_or_prompt,
};
pub use session::{DecodedDocument, LoadOutcome, LoadTicket, Session, SessionState};

use crate::bundle::{BundleError, is_bundle_path};

/// Display name of a document that has never been saved.
pub const UNTITLED: &str = "Untitled";

/// Errors that can occur while operating on a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no document is open")]
    NoDocument,

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("{} is not valid UTF-8 text", path.display())]
    InvalidUtf8 { path: PathBuf },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("load was superseded by a newer request")]
    Superseded,

    #[error("PDF rendering failed: {0}")]
    Pdf(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// On-disk representation chosen from a path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.mp` bundle with embedded images.
    Bundle,
    /// UTF-8 markdown, no images.
    PlainText,
}

impl DocumentFormat {
    pub fn for_path(path: &Path) -> Self {
        if is_bundle_path(path) {
            Self::Bundle
        } else {
            Self::PlainText
        }
    }
}
