//! Render-time image handles.
//!
//! A [`BlobStore`] plays the role of a browser's object-URL table: every
//! stored payload gets a `blob:mdpaper/<id>` URL that stays resolvable until
//! its [`BlobHandle`] is dropped.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

/// URL scheme of handle URLs.
pub const HANDLE_SCHEME: &str = "blob";

/// Prefix shared by every handle URL.
pub const HANDLE_URL_PREFIX: &str = "blob:mdpaper/";

static GLOBAL_STORE: LazyLock<BlobStore> = LazyLock::new(BlobStore::new);

#[derive(Debug)]
struct Blob {
    bytes: Arc<[u8]>,
    mime: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    blobs: HashMap<u64, Blob>,
    next_id: u64,
}

/// Shared table of live image payloads keyed by handle URL.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl BlobStore {
    /// Create an empty, independent store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store.
    pub fn global() -> Self {
        GLOBAL_STORE.clone()
    }

    /// Store a payload and return the handle that owns it.
    pub fn create(&self, bytes: Arc<[u8]>, mime: &str) -> BlobHandle {
        let id = {
            let mut guard = self.lock();
            guard.next_id += 1;
            let id = guard.next_id;
            guard.blobs.insert(
                id,
                Blob {
                    bytes,
                    mime: mime.to_string(),
                },
            );
            id
        };
        tracing::trace!(id, mime, "blob handle created");
        BlobHandle {
            id,
            url: format!("{HANDLE_URL_PREFIX}{id}"),
            store: self.clone(),
        }
    }

    /// Payload and mime type behind a live handle URL.
    pub fn resolve(&self, url: &str) -> Option<(Arc<[u8]>, String)> {
        let id = url.strip_prefix(HANDLE_URL_PREFIX)?.parse::<u64>().ok()?;
        let guard = self.lock();
        guard
            .blobs
            .get(&id)
            .map(|blob| (Arc::clone(&blob.bytes), blob.mime.clone()))
    }

    /// Number of handles that have not been released yet.
    pub fn live_count(&self) -> usize {
        self.lock().blobs.len()
    }

    fn revoke(&self, id: u64) -> bool {
        self.lock().blobs.remove(&id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owned handle to a stored payload. Dropping it releases the URL.
#[derive(Debug)]
pub struct BlobHandle {
    id: u64,
    url: String,
    store: BlobStore,
}

impl BlobHandle {
    /// URL usable as an image source while the handle lives.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        let released = self.store.revoke(self.id);
        debug_assert!(released, "blob handle {} released twice", self.id);
        tracing::trace!(id = self.id, "blob handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_resolve() {
        let store = BlobStore::new();
        let handle = store.create(Arc::from(&b"abc"[..]), "image/png");
        assert!(handle.url().starts_with("blob:mdpaper/"));
        let (bytes, mime) = store.resolve(handle.url()).unwrap();
        assert_eq!(&*bytes, b"abc");
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let store = BlobStore::new();
        let handle = store.create(Arc::from(&b"abc"[..]), "image/png");
        let url = handle.url().to_string();
        assert_eq!(store.live_count(), 1);
        drop(handle);
        assert_eq!(store.live_count(), 0);
        assert!(store.resolve(&url).is_none());
    }

    #[test]
    fn test_urls_are_unique_within_a_store() {
        let store = BlobStore::new();
        let a = store.create(Arc::from(&b"a"[..]), "image/png");
        let b = store.create(Arc::from(&b"a"[..]), "image/png");
        assert_ne!(a.url(), b.url());
    }

    #[test]
    fn test_resolve_rejects_foreign_urls() {
        let store = BlobStore::new();
        assert!(store.resolve("https://example.com/1").is_none());
        assert!(store.resolve("blob:mdpaper/not-a-number").is_none());
    }
}
