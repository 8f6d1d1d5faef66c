//! The document session state machine.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::host::{PdfRenderer, Storage};
use super::{DocumentFormat, Result, SessionError, UNTITLED};
use crate::bundle::{self, BundleImage};
use crate::image::{ImageInsertion, ImageRegistry};
use crate::markdown::render_html;
use crate::print::{PrintSettings, printable_document};
use crate::style::{self, StyleSettings};

const BOM: char = '\u{feff}';

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No document open.
    #[default]
    Closed,
    /// Open and identical to the last saved or loaded state.
    Clean,
    /// Open with unsaved changes.
    Dirty,
}

/// Token for a load started with [`Session::begin_load`].
///
/// Only the most recent ticket can complete; any later load, new document
/// or close supersedes it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a load ticket does nothing unless passed to finish_load"]
pub struct LoadTicket {
    generation: u64,
}

/// A file decoded into text and images, not yet applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDocument {
    pub path: PathBuf,
    pub markdown: String,
    pub images: Vec<BundleImage>,
    /// Manifest entries whose archive member was absent.
    pub missing_images: Vec<String>,
}

impl DecodedDocument {
    /// Decode file contents by the format implied by `path`.
    ///
    /// Does not touch any session, so it can run on a worker thread.
    pub fn decode(bytes: &[u8], path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let _scope = crate::perf::scope("document.decode");
        match DocumentFormat::for_path(&path) {
            DocumentFormat::Bundle => {
                let decoded = bundle::decode(bytes)?;
                Ok(Self {
                    path,
                    markdown: decoded.markdown,
                    images: decoded.images,
                    missing_images: decoded.missing_images,
                })
            }
            DocumentFormat::PlainText => {
                let Ok(text) = std::str::from_utf8(bytes) else {
                    return Err(SessionError::InvalidUtf8 { path });
                };
                Ok(Self {
                    markdown: text.strip_prefix(BOM).unwrap_or(text).to_string(),
                    path,
                    images: Vec::new(),
                    missing_images: Vec::new(),
                })
            }
        }
    }
}

/// What a completed load found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub missing_images: Vec<String>,
    /// Font settings recorded in the document's style block.
    pub style: StyleSettings,
}

#[derive(Debug, Default)]
struct Snapshot {
    markdown: String,
    revision: u64,
}

/// One open (or closed) document: text, rendered HTML, images and path.
///
/// `html` is always the render of `markdown` against `images`; every method
/// that changes either re-renders before returning.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    path: Option<PathBuf>,
    markdown: String,
    html: String,
    images: ImageRegistry,
    saved: Snapshot,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A closed session using the process-wide handle store.
    pub fn new() -> Self {
        Self::with_registry(ImageRegistry::new())
    }

    /// A closed session owning `images`, which is cleared.
    pub fn with_registry(mut images: ImageRegistry) -> Self {
        images.reset();
        Self {
            state: SessionState::Closed,
            path: None,
            markdown: String::new(),
            html: String::new(),
            images,
            saved: Snapshot::default(),
            generation: 0,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn is_modified(&self) -> bool {
        self.state == SessionState::Dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub const fn images(&self) -> &ImageRegistry {
        &self.images
    }

    /// File name of the document, or "Untitled".
    pub fn display_name(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map_or_else(|| UNTITLED.to_string(), |name| name.to_string_lossy().into_owned())
    }

    /// Window title: the display name, marked when there are unsaved changes.
    pub fn title(&self) -> String {
        if self.is_modified() {
            format!("• {}", self.display_name())
        } else {
            self.display_name()
        }
    }

    /// Font settings from the document's style block.
    pub fn style(&self) -> StyleSettings {
        style::extract_style(&self.markdown)
    }

    /// Start an empty, unsaved document. Supersedes pending loads.
    pub fn new_document(&mut self) {
        self.generation += 1;
        self.images.reset();
        self.markdown.clear();
        self.path = None;
        self.rerender();
        self.mark_saved();
        info!("new document");
    }

    /// Reserve the right to replace the document with a load that completes later.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        debug!(generation = self.generation, "load started");
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Replace the document with `decoded` if `ticket` is still current.
    ///
    /// The new registry is filled and rendered before anything is swapped
    /// in; the old registry's handles are released on swap.
    pub fn finish_load(&mut self, ticket: LoadTicket, decoded: DecodedDocument) -> Result<LoadOutcome> {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding superseded load"
            );
            return Err(SessionError::Superseded);
        }

        let mut images = self.images.empty_like();
        for image in decoded.images {
            images.insert(image.name, image.bytes);
        }
        let html = render_html(&decoded.markdown, &images);

        self.images = images;
        self.markdown = decoded.markdown;
        self.html = html;
        self.path = Some(decoded.path);
        self.mark_saved();
        info!(
            path = %self.display_name(),
            images = self.images.len(),
            missing = decoded.missing_images.len(),
            "document loaded"
        );

        Ok(LoadOutcome {
            missing_images: decoded.missing_images,
            style: self.style(),
        })
    }

    /// Decode and load `bytes` as the file at `path`.
    ///
    /// On error the session is left as it was.
    pub fn load(&mut self, bytes: &[u8], path: impl Into<PathBuf>) -> Result<LoadOutcome> {
        let decoded = DecodedDocument::decode(bytes, path)?;
        let ticket = self.begin_load();
        self.finish_load(ticket, decoded)
    }

    /// Read `path` through `storage` and load it.
    pub fn open(&mut self, path: &Path, storage: &impl Storage) -> Result<LoadOutcome> {
        let bytes = storage
            .read_file_bytes(path)
            .map_err(|source| SessionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.load(&bytes, path)
    }

    /// Replace the document text.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<()> {
        self.require_open()?;
        self.markdown = text.into();
        self.rerender();
        self.refresh_state();
        Ok(())
    }

    /// Set the document font family in its style block.
    pub fn set_font_family(&mut self, family: &str) -> Result<()> {
        let text = style::update_font_family(&self.markdown, family);
        self.edit(text)
    }

    /// Set the document font size (points) in its style block.
    pub fn set_font_size(&mut self, size: u32) -> Result<()> {
        let text = style::update_font_size(&self.markdown, size);
        self.edit(text)
    }

    /// Register an image. The returned markup is not inserted into the text.
    pub fn add_image(&mut self, bytes: impl Into<Vec<u8>>, suggested_name: &str) -> Result<ImageInsertion> {
        self.require_open()?;
        let insertion = self.images.add(bytes, suggested_name);
        self.rerender();
        self.refresh_state();
        Ok(insertion)
    }

    /// Drop an image; references to it render with an empty source.
    pub fn remove_image(&mut self, name: &str) -> Result<bool> {
        self.require_open()?;
        let removed = self.images.remove(name);
        if removed {
            self.rerender();
            self.refresh_state();
        }
        Ok(removed)
    }

    /// File contents for saving to `path`.
    ///
    /// Bundles embed only the images the text references. Plain text cannot
    /// hold images; referenced images are dropped with a warning.
    pub fn serialize(&self, path: &Path) -> Result<Vec<u8>> {
        self.require_open()?;
        let referenced = self.images.referenced_entries(&self.markdown);
        match DocumentFormat::for_path(path) {
            DocumentFormat::Bundle => {
                let pruned = self.images.len() - referenced.len();
                if pruned > 0 {
                    debug!(pruned, "leaving unreferenced images out of bundle");
                }
                let images = referenced.iter().map(|entry| (entry.name(), entry.bytes()));
                Ok(bundle::encode(&self.markdown, images)?)
            }
            DocumentFormat::PlainText => {
                if !referenced.is_empty() {
                    warn!(
                        path = %path.display(),
                        images = referenced.len(),
                        "plain-text save drops embedded images; save as .mp to keep them"
                    );
                }
                Ok(self.markdown.as_bytes().to_vec())
            }
        }
    }

    /// Write the document to `path`. On failure nothing changes.
    pub fn save(&mut self, path: impl AsRef<Path>, storage: &mut impl Storage) -> Result<()> {
        let path = path.as_ref();
        let _scope = crate::perf::scope("document.save");
        let bytes = self.serialize(path)?;
        storage
            .write_file_bytes(path, &bytes)
            .map_err(|source| SessionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.path = Some(path.to_path_buf());
        self.mark_saved();
        info!(path = %path.display(), bytes = bytes.len(), "document saved");
        Ok(())
    }

    /// Close the document and release its images. Never prompts.
    pub fn close(&mut self) {
        self.generation += 1;
        self.images.reset();
        self.markdown.clear();
        self.html.clear();
        self.path = None;
        self.saved = Snapshot::default();
        self.state = SessionState::Closed;
        info!("document closed");
    }

    /// Standalone printable HTML with images inlined.
    pub fn printable_html(&self, settings: &PrintSettings) -> Result<String> {
        self.require_open()?;
        if settings.title.is_some() {
            return Ok(printable_document(&self.html, settings, self.images.store()));
        }
        let settings = PrintSettings {
            title: Some(self.display_name()),
            ..settings.clone()
        };
        Ok(printable_document(&self.html, &settings, self.images.store()))
    }

    /// Render the document to PDF through `renderer`.
    pub fn print_to_pdf<R: PdfRenderer>(&self, settings: &PrintSettings, renderer: &mut R) -> Result<Vec<u8>> {
        let html = self.printable_html(settings)?;
        renderer
            .render_to_pdf(&html, settings.paper)
            .map_err(|err| SessionError::Pdf(err.to_string()))
    }

    fn require_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::NoDocument)
        }
    }

    fn rerender(&mut self) {
        self.html = render_html(&self.markdown, &self.images);
    }

    fn mark_saved(&mut self) {
        self.saved = Snapshot {
            markdown: self.markdown.clone(),
            revision: self.images.revision(),
        };
        self.state = SessionState::Clean;
    }

    fn refresh_state(&mut self) {
        let unchanged =
            self.saved.markdown == self.markdown && self.saved.revision == self.images.revision();
        self.state = if unchanged {
            SessionState::Clean
        } else {
            SessionState::Dirty
        };
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;

    use super::*;
    use crate::image::BlobStore;
    use crate::print::PaperSize;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[derive(Default)]
    struct MemoryStorage {
        files: HashMap<PathBuf, Vec<u8>>,
        fail_writes: bool,
    }

    impl Storage for MemoryStorage {
        fn read_file_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write_file_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::other("disk full"));
            }
            self.files.insert(path.to_path_buf(), bytes.to_vec());
            Ok(())
        }
    }

    struct EchoRenderer;

    impl PdfRenderer for EchoRenderer {
        type Error = io::Error;

        fn render_to_pdf(&mut self, html: &str, _paper: PaperSize) -> io::Result<Vec<u8>> {
            Ok(html.as_bytes().to_vec())
        }
    }

    fn session() -> (Session, BlobStore) {
        let store = BlobStore::new();
        (Session::with_registry(ImageRegistry::with_store(store.clone())), store)
    }

    fn open_session() -> (Session, BlobStore) {
        let (mut session, store) = session();
        session.new_document();
        (session, store)
    }

    #[test]
    fn test_new_session_is_closed() {
        let (mut session, _) = session();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.edit("x"), Err(SessionError::NoDocument)));
        assert!(matches!(session.add_image(PNG, "a.png"), Err(SessionError::NoDocument)));
    }

    #[test]
    fn test_new_document_is_clean_and_untitled() {
        let (session, _) = open_session();
        assert_eq!(session.state(), SessionState::Clean);
        assert_eq!(session.markdown(), "");
        assert_eq!(session.title(), "Untitled");
    }

    #[test]
    fn test_edit_marks_dirty_and_reverting_cleans() {
        let (mut session, _) = open_session();
        session.edit("# Hi").unwrap();
        assert!(session.is_modified());
        assert_eq!(session.title(), "• Untitled");
        assert!(session.html().contains("<h1>Hi</h1>"));
        session.edit("").unwrap();
        assert_eq!(session.state(), SessionState::Clean);
    }

    #[test]
    fn test_added_image_renders_through_handle() {
        let (mut session, _) = open_session();
        let insertion = session.add_image(PNG, "a.png").unwrap();
        assert_eq!(insertion.markup, "![a]($a.png)");
        assert!(session.is_modified());
        session.edit(insertion.markup).unwrap();
        let url = session.images().get("a.png").unwrap().url().to_string();
        assert!(session.html().contains(&format!(r#"src="{url}""#)), "{}", session.html());
    }

    #[test]
    fn test_removed_image_renders_empty_source() {
        let (mut session, _) = open_session();
        session.add_image(PNG, "a.png").unwrap();
        session.edit("![a]($a.png)").unwrap();
        assert!(session.remove_image("a.png").unwrap());
        assert!(session.html().contains(r#"src="""#));
        assert!(!session.remove_image("a.png").unwrap());
    }

    #[test]
    fn test_plain_text_load_strips_bom() {
        let (mut session, _) = session();
        let outcome = session.load("\u{feff}# Doc".as_bytes(), "/docs/a.md").unwrap();
        assert_eq!(session.markdown(), "# Doc");
        assert_eq!(session.state(), SessionState::Clean);
        assert_eq!(session.display_name(), "a.md");
        assert!(outcome.missing_images.is_empty());
    }

    #[test]
    fn test_failed_load_leaves_session_untouched() {
        let (mut session, _) = open_session();
        session.edit("keep me").unwrap();
        let err = session.load(b"\xff\xfe", "bad.md").unwrap_err();
        assert!(matches!(err, SessionError::InvalidUtf8 { .. }));
        let err = session.load(b"not a zip", "bad.mp").unwrap_err();
        assert!(matches!(err, SessionError::Bundle(_)));
        assert_eq!(session.markdown(), "keep me");
        assert!(session.is_modified());
        assert_eq!(session.path(), None);
    }

    #[test]
    fn test_superseded_ticket_is_rejected() {
        let (mut session, _) = open_session();
        let first = session.begin_load();
        let second = session.begin_load();
        let stale = DecodedDocument::decode(b"stale", "stale.md").unwrap();
        let fresh = DecodedDocument::decode(b"fresh", "fresh.md").unwrap();

        assert!(matches!(session.finish_load(first, stale), Err(SessionError::Superseded)));
        assert_eq!(session.markdown(), "");
        session.finish_load(second, fresh).unwrap();
        assert_eq!(session.markdown(), "fresh");
    }

    #[test]
    fn test_new_document_and_close_supersede_pending_loads() {
        let (mut session, _) = open_session();
        let ticket = session.begin_load();
        session.new_document();
        let decoded = DecodedDocument::decode(b"late", "late.md").unwrap();
        assert!(matches!(session.finish_load(ticket, decoded.clone()), Err(SessionError::Superseded)));

        let ticket = session.begin_load();
        session.close();
        assert!(matches!(session.finish_load(ticket, decoded), Err(SessionError::Superseded)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_save_bundle_prunes_unreferenced_images() {
        let (mut session, _) = open_session();
        let a = session.add_image(PNG, "a.png").unwrap();
        session.add_image(PNG, "b.png").unwrap();
        session.edit(a.markup).unwrap();

        let mut storage = MemoryStorage::default();
        session.save("/docs/out.mp", &mut storage).unwrap();
        assert_eq!(session.state(), SessionState::Clean);
        assert_eq!(session.display_name(), "out.mp");

        let saved = &storage.files[Path::new("/docs/out.mp")];
        let decoded = bundle::decode(saved).unwrap();
        assert_eq!(decoded.metadata.image_names().collect::<Vec<_>>(), ["a.png"]);
        assert_eq!(decoded.images.len(), 1);
        // The registry itself keeps b.png.
        assert!(session.images().contains("b.png"));
    }

    #[test]
    fn test_save_plain_text_writes_markdown() {
        let (mut session, _) = open_session();
        session.edit("# Plain").unwrap();
        let mut storage = MemoryStorage::default();
        session.save("out.md", &mut storage).unwrap();
        assert_eq!(storage.files[Path::new("out.md")], b"# Plain");
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let (mut session, _) = open_session();
        session.edit("text").unwrap();
        let mut storage = MemoryStorage {
            fail_writes: true,
            ..MemoryStorage::default()
        };
        let err = session.save("out.md", &mut storage).unwrap_err();
        assert!(matches!(err, SessionError::Io { .. }));
        assert!(session.is_modified());
        assert_eq!(session.path(), None);
    }

    #[test]
    fn test_open_reads_through_storage() {
        let (mut session, _) = session();
        let mut storage = MemoryStorage::default();
        storage.files.insert(PathBuf::from("doc.md"), b"hello".to_vec());
        session.open(Path::new("doc.md"), &storage).unwrap();
        assert_eq!(session.markdown(), "hello");
        let err = session.open(Path::new("missing.md"), &storage).unwrap_err();
        assert!(matches!(err, SessionError::Io { .. }));
        assert_eq!(session.markdown(), "hello");
    }

    #[test]
    fn test_load_and_close_release_handles() {
        let (mut session, store) = open_session();
        session.add_image(PNG, "a.png").unwrap();
        session.add_image(PNG, "b.png").unwrap();
        assert_eq!(store.live_count(), 2);

        let bytes = bundle::encode("![a]($a.png)", [("a.png", PNG)]).unwrap();
        session.load(&bytes, "doc.mp").unwrap();
        assert_eq!(store.live_count(), 1);

        session.close();
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_load_reports_style() {
        let (mut session, _) = session();
        let text = style::update_font_size("body", 14);
        let outcome = session.load(text.as_bytes(), "styled.md").unwrap();
        assert_eq!(outcome.style.font_size, Some(14));
    }

    #[test]
    fn test_set_font_updates_text() {
        let (mut session, _) = open_session();
        session.set_font_family("Pretendard").unwrap();
        session.set_font_size(15).unwrap();
        let style = session.style();
        assert_eq!(style.font_family.as_deref(), Some("Pretendard"));
        assert_eq!(style.font_size, Some(15));
        assert!(session.is_modified());
    }

    #[test]
    fn test_print_to_pdf_inlines_images() {
        let (mut session, _) = open_session();
        let a = session.add_image(PNG, "a.png").unwrap();
        session.edit(a.markup).unwrap();
        let pdf = session
            .print_to_pdf(&PrintSettings::with_paper(PaperSize::A5), &mut EchoRenderer)
            .unwrap();
        let html = String::from_utf8(pdf).unwrap();
        assert!(html.contains("size: a5;"));
        assert!(html.contains("src=\"data:image/png;base64,"));
        assert!(!html.contains("blob:mdpaper/"));
        assert!(html.contains("<title>Untitled</title>"));
    }
}
