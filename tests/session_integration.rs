use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use mdpaper::bundle;
use mdpaper::document::{DecodedDocument, Session, SessionError, SessionState, Storage};
use mdpaper::image::{BlobStore, ImageRegistry};
use mdpaper::markdown::{PAGE_BREAK_MARKER, render_html};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[derive(Default)]
struct MemoryStorage {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl Storage for MemoryStorage {
    fn read_file_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn write_file_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }
}

fn isolated_session() -> (Session, BlobStore) {
    let store = BlobStore::new();
    let session = Session::with_registry(ImageRegistry::with_store(store.clone()));
    (session, store)
}

#[test]
fn test_fenced_page_break_stays_literal() {
    let text = "```\n---pagebreak---\n```\n\n---pagebreak---\n";
    let html = render_html(text, &ImageRegistry::with_store(BlobStore::new()));
    assert!(html.contains("<code>---pagebreak---\n</code>"), "{html}");
    assert_eq!(html.matches(PAGE_BREAK_MARKER).count(), 1, "{html}");
}

#[test]
fn test_added_image_renders_handle_url() {
    let mut registry = ImageRegistry::with_store(BlobStore::new());
    let insertion = registry.add(PNG, "a.png");
    assert_eq!(insertion.name, "a.png");
    let url = registry.get("a.png").unwrap().url().to_string();
    let html = render_html("![a]($a.png)", &registry);
    assert!(html.contains(&format!(r#"src="{url}""#)), "{html}");
}

#[test]
fn test_unknown_local_reference_renders_empty_source() {
    let html = render_html("![x]($nope.png)", &ImageRegistry::with_store(BlobStore::new()));
    assert!(html.contains(r#"src="""#), "{html}");
}

#[test]
fn test_bundle_reload_keeps_only_referenced_images() {
    let (mut session, store) = isolated_session();
    session.new_document();
    session.add_image(PNG, "a.png").unwrap();
    session.add_image(b"GIF89a".to_vec(), "b.png").unwrap();
    session.edit("# Doc\n\n![a]($a.png)\n").unwrap();

    let mut storage = MemoryStorage::default();
    session.save("doc.mp", &mut storage).unwrap();

    let (mut reopened, reopened_store) = isolated_session();
    let outcome = reopened.open(Path::new("doc.mp"), &storage).unwrap();
    assert!(outcome.missing_images.is_empty());
    assert_eq!(reopened.state(), SessionState::Clean);
    let names: Vec<_> = reopened.images().iter().map(|entry| entry.name().to_string()).collect();
    assert_eq!(names, ["a.png"]);
    assert_eq!(reopened.images().get("a.png").unwrap().bytes(), PNG);
    assert_eq!(reopened_store.live_count(), 1);

    session.close();
    assert_eq!(store.live_count(), 0);
}

#[test]
fn test_missing_member_loads_remaining_images() {
    let manifest = br#"{"version":"1.0","lastModified":"2024-05-01T09:30:00Z","images":[{"name":"a.png"},{"name":"b.png"}]}"#;
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in [
        ("content.md", &b"![a]($a.png) ![b]($b.png)"[..]),
        ("metadata.json", &manifest[..]),
        ("images/a.png", PNG),
    ] {
        writer.start_file(name, options).unwrap();
        io::Write::write_all(&mut writer, bytes).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    let (mut session, _) = isolated_session();
    let outcome = session.load(&bytes, "partial.mp").unwrap();
    assert_eq!(outcome.missing_images, ["b.png"]);
    assert!(session.images().contains("a.png"));
    assert!(!session.images().contains("b.png"));
    assert!(session.html().contains(r#"src="""#));
}

#[test]
fn test_failed_load_keeps_previous_document_and_images() {
    let (mut session, store) = isolated_session();
    session.new_document();
    session.add_image(PNG, "a.png").unwrap();
    session.edit("![a]($a.png)").unwrap();
    let html = session.html().to_string();

    let err = session.load(b"PK\x03\x04 truncated", "broken.mp").unwrap_err();
    assert!(matches!(err, SessionError::Bundle(_)));
    assert_eq!(session.html(), html);
    assert!(session.images().contains("a.png"));
    assert_eq!(store.live_count(), 1);
    assert!(session.is_modified());
}

#[test]
fn test_async_style_load_is_generation_guarded() {
    let (mut session, _) = isolated_session();
    session.new_document();

    let slow = session.begin_load();
    let slow_bytes = bundle::encode("slow", std::iter::empty()).unwrap();
    let fast = session.begin_load();

    let fast_doc = std::thread::spawn(|| DecodedDocument::decode(b"fast", "fast.md"))
        .join()
        .unwrap()
        .unwrap();
    session.finish_load(fast, fast_doc).unwrap();

    let slow_doc = DecodedDocument::decode(&slow_bytes, "slow.mp").unwrap();
    assert!(matches!(session.finish_load(slow, slow_doc), Err(SessionError::Superseded)));
    assert_eq!(session.markdown(), "fast");
    assert_eq!(session.display_name(), "fast.md");
}

#[test]
fn test_dirty_tracking_follows_saved_snapshot() {
    let (mut session, _) = isolated_session();
    let mut storage = MemoryStorage::default();
    storage.files.insert(PathBuf::from("a.md"), b"saved".to_vec());
    session.open(Path::new("a.md"), &storage).unwrap();
    assert_eq!(session.title(), "a.md");

    session.edit("changed").unwrap();
    assert_eq!(session.title(), "• a.md");
    session.edit("saved").unwrap();
    assert_eq!(session.state(), SessionState::Clean);

    session.add_image(PNG, "a.png").unwrap();
    assert!(session.is_modified());
    session.save("a.md", &mut storage).unwrap();
    assert!(!session.is_modified());
}
