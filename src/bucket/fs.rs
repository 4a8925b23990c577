use super::manifest::{read_manifest, write_manifest, BucketManifest, ManifestError};
use crate::listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
use crate::transfer::{
    validate_identity, DestinationDeleter, DestinationWriter, SourceFetcher, TransferError,
};
use crate::utils::{compute_file_hash, compute_hash, is_internal_path, TEMP_SUFFIX};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

impl From<ManifestError> for ListingError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::ReadError(e) => ListingError::IoError(e),
            ManifestError::ParseError(e) => ListingError::JsonError(e),
        }
    }
}

impl From<ManifestError> for TransferError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::ReadError(e) => TransferError::IoError(e),
            ManifestError::ParseError(e) => TransferError::JsonError(e),
        }
    }
}

/// Directory-backed bucket scoped to one key prefix.
///
/// Objects live at `<bucket_root>/<prefix>/<identity>`. Source fingerprints
/// supplied on `put` are kept in the prefix's manifest.
#[derive(Debug, Clone)]
pub struct FsBucket {
    root: PathBuf,
    manifest_lock: Arc<Mutex<()>>,
}

impl FsBucket {
    pub fn new(bucket_root: impl AsRef<Path>, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let root = if prefix.is_empty() {
            bucket_root.as_ref().to_path_buf()
        } else {
            bucket_root.as_ref().join(prefix)
        };

        Self {
            root,
            manifest_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding this prefix's objects
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, identity: &str) -> Result<PathBuf, TransferError> {
        validate_identity(identity)?;
        Ok(self.root.join(identity))
    }

    /// Walk the prefix and return identities of stored objects, sorted
    fn scan_objects(&self) -> Result<Vec<(String, PathBuf)>, ListingError> {
        let mut objects = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ListingError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| ListingError::Malformed(e.to_string()))?;
            let identity = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if is_internal_path(&identity) {
                continue;
            }
            objects.push((identity, entry.path().to_path_buf()));
        }

        Ok(objects)
    }

    async fn update_manifest<F>(&self, f: F) -> Result<(), TransferError>
    where
        F: FnOnce(&mut BucketManifest),
    {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = read_manifest(&self.root).await?.unwrap_or_default();
        f(&mut manifest);
        write_manifest(&self.root, &manifest).await?;
        Ok(())
    }

    /// Remove now-empty directories between an object and the prefix root
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl Lister for FsBucket {
    async fn list(&self) -> Result<Listing, ListingError> {
        if !self.root.exists() {
            return Ok(Listing::empty(Origin::Destination));
        }
        if !self.root.is_dir() {
            return Err(ListingError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let manifest = read_manifest(&self.root).await?;
        let mut items = Vec::new();

        for (identity, path) in self.scan_objects()? {
            let (hash, size) = compute_file_hash(&path).await?;
            let mut fingerprint = Fingerprint::from_hash(hash, size);

            // A recorded token is only trusted while the content is still
            // what was uploaded.
            if let Some(recorded) = manifest.as_ref().and_then(|m| m.fingerprint_of(&identity)) {
                if recorded.hash.is_none() || recorded.hash == fingerprint.hash {
                    fingerprint = fingerprint.merged_with(recorded);
                }
            }

            items.push(Item::new(identity, fingerprint, Origin::Destination));
        }

        debug!(root = %self.root.display(), count = items.len(), "Listed bucket prefix");
        Listing::new(Origin::Destination, items)
    }
}

#[async_trait]
impl DestinationWriter for FsBucket {
    async fn put(
        &self,
        identity: &str,
        bytes: Vec<u8>,
        fingerprint: &Fingerprint,
    ) -> Result<(), TransferError> {
        let path = self.object_path(identity)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| TransferError::InvalidIdentity(identity.to_string()))?;
        let temp_path = path.with_file_name(format!(
            "{}.{}{}",
            file_name,
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        let recorded = Fingerprint {
            size: Some(bytes.len() as u64),
            hash: Some(compute_hash(&bytes)),
            token: fingerprint.token.clone(),
        };

        if let Err(e) = fs::write(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(TransferError::WriteFailed(identity.to_string(), e.to_string()));
        }
        // Only an empty directory left at the target can be replaced
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            let _ = fs::remove_dir(&path).await;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(TransferError::WriteFailed(identity.to_string(), e.to_string()));
        }

        self.update_manifest(|m| m.record(identity, recorded)).await
    }
}

#[async_trait]
impl DestinationDeleter for FsBucket {
    async fn delete(&self, identity: &str) -> Result<(), TransferError> {
        let path = self.object_path(identity)?;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(identity.to_string()));
            }
            Err(e) => {
                return Err(TransferError::DeleteFailed(identity.to_string(), e.to_string()));
            }
        }

        self.prune_empty_parents(&path).await;
        self.update_manifest(|m| {
            m.forget(identity);
        })
        .await
    }
}

/// Lets one bucket prefix feed another, e.g. when mirroring between buckets
#[async_trait]
impl SourceFetcher for FsBucket {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        let path = self.object_path(identity)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(identity.to_string()))
            }
            Err(e) => Err(TransferError::FetchFailed(identity.to_string(), e.to_string())),
        }
    }
}
