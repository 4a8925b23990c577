use crate::listing::Fingerprint;
use crate::utils::{get_manifest_path, now_iso, SYNC_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Per-prefix record of object metadata, the filesystem stand-in for object
/// user metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketManifest {
    pub schema_version: u32,
    pub sync_version: String,
    pub created_at: String,
    pub updated_at: String,
    pub objects: BTreeMap<String, ObjectEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    pub fingerprint: Fingerprint,
    pub uploaded_at: String,
}

impl BucketManifest {
    pub fn new() -> Self {
        let now = now_iso();
        Self {
            schema_version: 1,
            sync_version: SYNC_VERSION.to_string(),
            created_at: now.clone(),
            updated_at: now,
            objects: BTreeMap::new(),
        }
    }

    /// Add or replace the entry for an object
    pub fn record(&mut self, identity: &str, fingerprint: Fingerprint) {
        let now = now_iso();
        self.objects.insert(
            identity.to_string(),
            ObjectEntry {
                fingerprint,
                uploaded_at: now.clone(),
            },
        );
        self.updated_at = now;
    }

    /// Drop the entry for an object, returning whether one existed
    pub fn forget(&mut self, identity: &str) -> bool {
        let removed = self.objects.remove(identity).is_some();
        if removed {
            self.updated_at = now_iso();
        }
        removed
    }

    pub fn fingerprint_of(&self, identity: &str) -> Option<&Fingerprint> {
        self.objects.get(identity).map(|e| &e.fingerprint)
    }
}

impl Default for BucketManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the manifest of a prefix, if one has been written
pub async fn read_manifest(prefix_root: &Path) -> Result<Option<BucketManifest>, ManifestError> {
    let manifest_path = get_manifest_path(prefix_root);

    if !manifest_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&manifest_path).await?;
    let manifest: BucketManifest = serde_json::from_str(&content)?;
    Ok(Some(manifest))
}

/// Write the manifest atomically using temp file + rename
pub async fn write_manifest(
    prefix_root: &Path,
    manifest: &BucketManifest,
) -> Result<(), ManifestError> {
    let manifest_path = get_manifest_path(prefix_root);
    fs::create_dir_all(prefix_root).await?;

    let temp_path = manifest_path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(manifest)?;
    fs::write(&temp_path, &content).await?;
    fs::rename(&temp_path, &manifest_path).await?;
    Ok(())
}
