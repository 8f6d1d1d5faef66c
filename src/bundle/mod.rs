//! The `.mp` bundle format.
//!
//! A bundle is a zip archive holding:
//! - `content.md`: the markdown text, UTF-8
//! - `metadata.json`: [`BundleMetadata`]
//! - `images/<name>`: one member per manifest entry
//!
//! Decoding is tolerant of missing image members: they are skipped and
//! reported in [`DecodedBundle::missing_images`] so the rest of the document
//! can still be opened.

mod metadata;

pub use metadata::{BundleMetadata, ManifestEntry};

use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::image::is_bare_file_name;

/// Format version written into new bundles.
pub const FORMAT_VERSION: &str = "1.0";
/// File extension of bundles.
pub const BUNDLE_EXTENSION: &str = "mp";
pub const CONTENT_MEMBER: &str = "content.md";
pub const METADATA_MEMBER: &str = "metadata.json";
pub const IMAGES_DIR: &str = "images/";

/// Errors that can occur while encoding or decoding a bundle
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("not a readable bundle archive: {0}")]
    Archive(#[from] ZipError),

    #[error("bundle is missing {0}")]
    MissingMember(&'static str),

    #[error("invalid metadata.json: {0}")]
    InvalidMetadata(String),

    #[error("unsupported bundle version {0}")]
    UnsupportedVersion(String),

    #[error("content.md is not valid UTF-8")]
    InvalidContent,

    #[error("duplicate image name {0:?}")]
    DuplicateImage(String),

    #[error("invalid image name {0:?}")]
    InvalidImageName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// An image read back from a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Everything recovered from a bundle.
#[derive(Debug, Clone)]
pub struct DecodedBundle {
    pub markdown: String,
    pub metadata: BundleMetadata,
    /// Images found in the archive, in manifest order.
    pub images: Vec<BundleImage>,
    /// Manifest names whose member was absent or unreadable.
    pub missing_images: Vec<String>,
}

/// Whether `path` names a bundle (by extension, case-insensitive).
pub fn is_bundle_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(BUNDLE_EXTENSION))
}

/// Encode a bundle stamped with the current time.
///
/// Every image passed in is embedded; callers prune unreferenced images first.
pub fn encode<'a, I>(markdown: &str, images: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    encode_at(markdown, images, Utc::now())
}

/// Encode a bundle with an explicit `lastModified` timestamp.
pub fn encode_at<'a, I>(markdown: &str, images: I, last_modified: DateTime<Utc>) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let _scope = crate::perf::scope("bundle.encode");
    let images: Vec<(&str, &[u8])> = images.into_iter().collect();

    let mut seen = HashSet::new();
    for (name, _) in &images {
        if !is_bare_file_name(name) {
            return Err(BundleError::InvalidImageName((*name).to_string()));
        }
        if !seen.insert(*name) {
            return Err(BundleError::DuplicateImage((*name).to_string()));
        }
    }

    let metadata = BundleMetadata::new(last_modified, images.iter().map(|(name, _)| *name));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(CONTENT_MEMBER, member_options(CompressionMethod::Deflated))?;
    writer.write_all(markdown.as_bytes())?;
    writer.start_file(METADATA_MEMBER, member_options(CompressionMethod::Deflated))?;
    writer.write_all(&metadata.to_json()?)?;
    writer.add_directory(IMAGES_DIR, member_options(CompressionMethod::Stored))?;
    for (name, bytes) in &images {
        // Image formats are already compressed.
        writer.start_file(format!("{IMAGES_DIR}{name}"), member_options(CompressionMethod::Stored))?;
        writer.write_all(bytes)?;
    }
    let bytes = writer.finish()?.into_inner();

    debug!(
        markdown_bytes = markdown.len(),
        images = images.len(),
        bundle_bytes = bytes.len(),
        "bundle encoded"
    );
    crate::perf::log_event(
        "bundle.encode",
        format!("images={} bytes={}", images.len(), bytes.len()),
    );
    Ok(bytes)
}

/// Decode a bundle.
///
/// Fails if the archive is unreadable, `content.md` or `metadata.json` is
/// absent, or the metadata is invalid. Missing image members do not fail the
/// decode; see [`DecodedBundle::missing_images`].
pub fn decode(bytes: &[u8]) -> Result<DecodedBundle> {
    let _scope = crate::perf::scope("bundle.decode");
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let content = read_member(&mut archive, CONTENT_MEMBER)?
        .ok_or(BundleError::MissingMember(CONTENT_MEMBER))?;
    let markdown = String::from_utf8(content).map_err(|_| BundleError::InvalidContent)?;
    let metadata_bytes = read_member(&mut archive, METADATA_MEMBER)?
        .ok_or(BundleError::MissingMember(METADATA_MEMBER))?;
    let metadata = BundleMetadata::from_json(&metadata_bytes)?;

    let mut images = Vec::with_capacity(metadata.images.len());
    let mut missing_images = Vec::new();
    for name in metadata.image_names() {
        let member = format!("{IMAGES_DIR}{name}");
        match read_member(&mut archive, &member) {
            Ok(Some(bytes)) => images.push(BundleImage {
                name: name.to_string(),
                bytes,
            }),
            Ok(None) => {
                warn!(name, "bundle manifest lists an image that is not in the archive");
                missing_images.push(name.to_string());
            }
            Err(err) => {
                warn!(name, error = %err, "bundle image could not be read; skipping");
                missing_images.push(name.to_string());
            }
        }
    }

    debug!(
        markdown_bytes = markdown.len(),
        images = images.len(),
        missing = missing_images.len(),
        version = %metadata.version,
        "bundle decoded"
    );
    crate::perf::log_event(
        "bundle.decode",
        format!("images={} missing={}", images.len(), missing_images.len()),
    );
    Ok(DecodedBundle {
        markdown,
        metadata,
        images,
        missing_images,
    })
}

fn member_options(method: CompressionMethod) -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(method)
}

/// Read a member's bytes; `Ok(None)` if the archive has no such member.
fn read_member(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}
