use crate::listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
use crate::transfer::{validate_identity, SourceFetcher, TransferError};
use crate::utils::{compute_file_hash, is_internal_path};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use walkdir::WalkDir;

/// Uses a local directory tree as the upstream origin
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Lister for LocalDirectorySource {
    async fn list(&self) -> Result<Listing, ListingError> {
        if !self.root.is_dir() {
            return Err(ListingError::Unavailable(format!(
                "source directory {} not found",
                self.root.display()
            )));
        }

        let mut items = Vec::new();
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
                // Listed anyway so the run reports it instead of dropping it
                warn!(identity = %identity, "Source name collides with bucket bookkeeping files");
            }

            let (hash, size) = compute_file_hash(entry.path()).await?;
            items.push(Item::new(
                identity,
                Fingerprint::from_hash(hash, size),
                Origin::Source,
            ));
        }

        Listing::new(Origin::Source, items)
    }
}

#[async_trait]
impl SourceFetcher for LocalDirectorySource {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        validate_identity(identity)?;
        match fs::read(self.root.join(identity)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(identity.to_string()))
            }
            Err(e) => Err(TransferError::FetchFailed(identity.to_string(), e.to_string())),
        }
    }
}
