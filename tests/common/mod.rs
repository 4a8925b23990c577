#![allow(dead_code)]

use async_trait::async_trait;
use bucket_sync::listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
use bucket_sync::transfer::{DestinationDeleter, DestinationWriter, SourceFetcher, TransferError};
use bucket_sync::MemoryBucket;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write files into a directory, creating parents as needed
pub async fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.expect("Should create dir");
        }
        tokio::fs::write(&path, content).await.expect("Should write file");
    }
}

/// Build a listing of hash fingerprints
pub fn hash_listing(origin: Origin, items: &[(&str, &str)]) -> Listing {
    Listing::new(
        origin,
        items
            .iter()
            .map(|(id, hash)| Item::new(*id, Fingerprint::from_hash(*hash, 1), origin))
            .collect(),
    )
    .expect("Should build listing")
}

/// Source wrapper whose fetch fails for chosen identities
pub struct FlakySource {
    pub inner: MemoryBucket,
    pub failing: HashSet<String>,
    pub fetches: AtomicUsize,
}

impl FlakySource {
    pub fn new(inner: MemoryBucket, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Lister for FlakySource {
    async fn list(&self) -> Result<Listing, ListingError> {
        self.inner.list().await
    }
}

#[async_trait]
impl SourceFetcher for FlakySource {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(identity) {
            return Err(TransferError::FetchFailed(
                identity.to_string(),
                "connection reset".to_string(),
            ));
        }
        self.inner.fetch(identity).await
    }
}

/// Destination wrapper that counts writes and can refuse some of them
pub struct CountingBucket {
    pub inner: MemoryBucket,
    pub refuse: HashSet<String>,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingBucket {
    pub fn new(inner: MemoryBucket) -> Self {
        Self::refusing(inner, &[])
    }

    pub fn refusing(inner: MemoryBucket, refuse: &[&str]) -> Self {
        Self {
            inner,
            refuse: refuse.iter().map(|s| s.to_string()).collect(),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lister for CountingBucket {
    async fn list(&self) -> Result<Listing, ListingError> {
        self.inner.list().await
    }
}

#[async_trait]
impl DestinationWriter for CountingBucket {
    async fn put(
        &self,
        identity: &str,
        bytes: Vec<u8>,
        fingerprint: &Fingerprint,
    ) -> Result<(), TransferError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.contains(identity) {
            return Err(TransferError::WriteFailed(
                identity.to_string(),
                "access denied".to_string(),
            ));
        }
        self.inner.put(identity, bytes, fingerprint).await
    }
}

#[async_trait]
impl DestinationDeleter for CountingBucket {
    async fn delete(&self, identity: &str) -> Result<(), TransferError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(identity).await
    }
}

/// A lister that is always unreachable
pub struct UnreachableSource;

#[async_trait]
impl Lister for UnreachableSource {
    async fn list(&self) -> Result<Listing, ListingError> {
        Err(ListingError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl SourceFetcher for UnreachableSource {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        Err(TransferError::FetchFailed(
            identity.to_string(),
            "connection refused".to_string(),
        ))
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
