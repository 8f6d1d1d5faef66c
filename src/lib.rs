// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. image::ImageRegistry)
    clippy::module_name_repetitions
)]

//! # mdpaper
//!
//! The document core of a markdown editor that prints to paper.
//!
//! mdpaper turns markdown into sanitized HTML with:
//! - Page breaks (`---pagebreak---`) for print layout
//! - Embedded images referenced as `![alt]($name)`
//! - A `.mp` bundle format that stores text and images in one file
//!
//! ## Architecture
//!
//! A [`document::Session`] owns the open document: its text, the
//! [`image::ImageRegistry`] of embedded images and the rendered HTML. Every
//! edit re-runs the pipeline in [`markdown`]:
//! - **Protect**: code spans are swapped for sentinels
//! - **Expand**: page breaks and local images are rewritten
//! - **Restore**: code spans come back untouched
//! - **Render**: comrak renders, ammonia sanitizes
//!
//! ## Modules
//!
//! - [`bundle`]: `.mp` encode and decode
//! - [`config`]: Saved command-line defaults
//! - [`document`]: Session state machine and host flows
//! - [`image`]: Image registry and render-time handles
//! - [`markdown`]: Rendering pipeline
//! - [`print`]: Paper sizes and printable documents
//! - [`style`]: Font settings stored in the document
//! - [`watcher`]: File watching

pub mod bundle;
pub mod config;
pub mod document;
pub mod image;
pub mod markdown;
pub mod perf;
pub mod print;
pub mod style;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bundle::{BundleError, DecodedBundle};
    pub use crate::document::{
        DecodedDocument, FsStorage, Host, LoadTicket, PdfRenderer, Session, SessionError,
        SessionState, Storage,
    };
    pub use crate::image::{CollisionPolicy, ImageInsertion, ImageRegistry};
    pub use crate::markdown::render_html;
    pub use crate::print::{PaperSize, PrintSettings};
}
