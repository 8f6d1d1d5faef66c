//! In-memory image registry.
//!
//! Images inserted into a document live here for as long as the document is
//! open. Each entry owns a render-time handle ([`BlobHandle`]) whose URL is
//! what local-image directives expand to.

mod handle;

pub use handle::{BlobHandle, BlobStore, HANDLE_SCHEME, HANDLE_URL_PREFIX};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

use crate::markdown::{HandleLookup, PAGE_BREAK, local_image_markup, referenced_images};

const FALLBACK_NAME: &str = "image";
const FALLBACK_MIME: &str = "application/octet-stream";
const SVG_MIME: &str = "image/svg+xml";

/// What happens when an added image's name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Pick the next free `stem-N.ext` name.
    #[default]
    Rename,
    /// Replace the existing entry (its handle is released).
    Replace,
}

/// An image owned by the registry.
#[derive(Debug)]
pub struct ImageEntry {
    name: String,
    bytes: Arc<[u8]>,
    mime: String,
    handle: BlobHandle,
}

impl ImageEntry {
    /// Registry key, also the bundle member name under `images/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Sniffed mime type.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Current render-time handle URL.
    pub fn url(&self) -> &str {
        self.handle.url()
    }
}

/// Result of [`ImageRegistry::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInsertion {
    /// Name the image was stored under.
    pub name: String,
    /// Directive markup to insert into the document.
    pub markup: String,
}

/// Name → image map for the open document.
#[derive(Debug)]
pub struct ImageRegistry {
    entries: BTreeMap<String, ImageEntry>,
    store: BlobStore,
    policy: CollisionPolicy,
    revision: u64,
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageRegistry {
    /// Create an empty registry backed by the process-wide handle store.
    pub fn new() -> Self {
        Self::with_store(BlobStore::global())
    }

    /// Create an empty registry backed by `store`.
    pub fn with_store(store: BlobStore) -> Self {
        Self {
            entries: BTreeMap::new(),
            store,
            policy: CollisionPolicy::default(),
            revision: 0,
        }
    }

    /// Set the name collision policy.
    pub const fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// An empty registry sharing this one's store and policy.
    pub fn empty_like(&self) -> Self {
        Self::with_store(self.store.clone()).with_collision_policy(self.policy)
    }

    pub const fn collision_policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub const fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Counter bumped by every mutation.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Register an image and return the markup that references it.
    pub fn add(&mut self, bytes: impl Into<Vec<u8>>, suggested_name: &str) -> ImageInsertion {
        let bytes: Vec<u8> = bytes.into();
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let base = sanitize_image_name(suggested_name, &bytes);
        let name = match self.policy {
            CollisionPolicy::Rename => self.free_name(&base),
            CollisionPolicy::Replace => base,
        };
        let alt = Path::new(&name)
            .file_stem()
            .map_or_else(|| name.clone(), |stem| stem.to_string_lossy().into_owned());
        self.insert_entry(name.clone(), bytes);
        ImageInsertion {
            markup: local_image_markup(&alt, &name),
            name,
        }
    }

    /// Store an image under exactly `name`, replacing any existing entry.
    ///
    /// Used when repopulating from a bundle, whose names are already validated.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.insert_entry(name.into(), Arc::from(bytes));
    }

    /// Drop an entry and release its handle. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            self.revision += 1;
            tracing::debug!(name, "image removed");
        }
        removed
    }

    /// Release every handle and clear all entries.
    pub fn reset(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(count = self.entries.len(), "image registry reset");
        }
        self.entries.clear();
        self.revision += 1;
    }

    pub fn get(&self, name: &str) -> Option<&ImageEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageEntry> {
        self.entries.values()
    }

    /// Names referenced by local-image directives in `markdown`.
    pub fn list_referenced(&self, markdown: &str) -> Vec<String> {
        referenced_images(markdown)
    }

    /// Registered entries referenced by `markdown`, in order of first reference.
    pub fn referenced_entries(&self, markdown: &str) -> Vec<&ImageEntry> {
        self.list_referenced(markdown)
            .iter()
            .filter_map(|name| self.entries.get(name))
            .collect()
    }

    fn insert_entry(&mut self, name: String, bytes: Arc<[u8]>) {
        let mime = sniff_mime(&bytes, &name);
        let handle = self.store.create(Arc::clone(&bytes), &mime);
        tracing::debug!(name = %name, mime = %mime, bytes = bytes.len(), "image registered");
        let entry = ImageEntry {
            name: name.clone(),
            bytes,
            mime,
            handle,
        };
        if self.entries.insert(name, entry).is_some() {
            tracing::debug!("replaced existing image entry");
        }
        self.revision += 1;
    }

    fn free_name(&self, base: &str) -> String {
        if !self.entries.contains_key(base) {
            return base.to_string();
        }
        let (stem, ext) = match base.rfind('.') {
            Some(dot) if dot > 0 => (&base[..dot], &base[dot..]),
            _ => (base, ""),
        };
        (1..)
            .map(|n| format!("{stem}-{n}{ext}"))
            .find(|candidate| !self.entries.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

impl HandleLookup for ImageRegistry {
    fn handle_url(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(ImageEntry::url)
    }
}

/// True for a plain file name: non-empty, no path separators, no drive or
/// scheme colon, not `.`/`..`, and no characters that break directive syntax.
pub fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(is_forbidden_name_char)
}

fn is_forbidden_name_char(c: char) -> bool {
    c.is_control()
        || matches!(c, '/' | '\\' | ':' | '(' | ')' | '[' | ']' | '<' | '>' | '"' | '$' | '`')
}

/// Turn a user-supplied name into a bare file name.
///
/// Directory components are dropped, forbidden characters become `_`, and a
/// missing extension is filled in from the sniffed image format. The result
/// always survives a round trip through its own directive markup.
pub fn sanitize_image_name(suggested: &str, bytes: &[u8]) -> String {
    let file_name = suggested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace(PAGE_BREAK, "pagebreak");
    let mut name: String = file_name
        .chars()
        .map(|c| if is_forbidden_name_char(c) { '_' } else { c })
        .collect::<String>()
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    if name.is_empty() {
        name = FALLBACK_NAME.to_string();
    }
    if !name.contains('.')
        && let Some(ext) = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first())
    {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Mime type from magic bytes, falling back to the file extension.
pub fn sniff_mime(bytes: &[u8], name: &str) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    let is_svg_name = Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"));
    if is_svg_name || looks_like_svg(bytes) {
        return SVG_MIME.to_string();
    }
    ImageFormat::from_path(name).map_or_else(
        |_| FALLBACK_MIME.to_string(),
        |format| format.to_mime_type().to_string(),
    )
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    String::from_utf8_lossy(head).contains("<svg")
}
