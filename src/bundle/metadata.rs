//! `metadata.json` schema.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BundleError, FORMAT_VERSION, Result};
use crate::image::is_bare_file_name;

/// One image listed in the bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Format version, `major.minor`.
    pub version: String,
    pub last_modified: DateTime<Utc>,
    /// Images in the bundle, in manifest order.
    #[serde(default)]
    pub images: Vec<ManifestEntry>,
}

impl BundleMetadata {
    /// Metadata for the current format version.
    pub fn new<'a>(last_modified: DateTime<Utc>, names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            last_modified,
            images: names
                .into_iter()
                .map(|name| ManifestEntry {
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    /// Parse and validate `metadata.json` bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)
            .map_err(|err| BundleError::InvalidMetadata(err.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| BundleError::InvalidMetadata(err.to_string()))
    }

    /// Check the version and the manifest names.
    ///
    /// Only major version 1 is understood. Manifest names must be unique
    /// bare file names so they can never address anything outside `images/`.
    pub fn validate(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or_default().trim();
        if major.is_empty() {
            return Err(BundleError::InvalidMetadata("empty version".to_string()));
        }
        if major != major_version(FORMAT_VERSION) {
            return Err(BundleError::UnsupportedVersion(self.version.clone()));
        }

        let mut seen = HashSet::new();
        for entry in &self.images {
            if !is_bare_file_name(&entry.name) {
                return Err(BundleError::InvalidImageName(entry.name.clone()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(BundleError::DuplicateImage(entry.name.clone()));
            }
        }
        Ok(())
    }

    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|entry| entry.name.as_str())
    }
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
