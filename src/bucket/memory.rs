use crate::listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
use crate::transfer::{
    validate_identity, DestinationDeleter, DestinationWriter, SourceFetcher, TransferError,
};
use crate::utils::compute_hash;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    token: Option<String>,
}

/// In-process bucket. Clones share the same contents.
///
/// Lists as `origin`, so the same type can stand in for either side.
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    origin: Origin,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::with_origin(Origin::Destination)
    }

    pub fn with_origin(origin: Origin) -> Self {
        Self {
            origin,
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Insert an object directly, bypassing validation
    pub async fn insert(&self, identity: &str, bytes: impl Into<Vec<u8>>, token: Option<&str>) {
        self.objects.write().await.insert(
            identity.to_string(),
            StoredObject {
                bytes: bytes.into(),
                token: token.map(str::to_string),
            },
        );
    }

    pub async fn get(&self, identity: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(identity).map(|o| o.bytes.clone())
    }

    pub async fn identities(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lister for MemoryBucket {
    async fn list(&self) -> Result<Listing, ListingError> {
        let objects = self.objects.read().await;
        let items = objects
            .iter()
            .map(|(identity, object)| {
                let fingerprint = Fingerprint {
                    size: Some(object.bytes.len() as u64),
                    hash: Some(compute_hash(&object.bytes)),
                    token: object.token.clone(),
                };
                Item::new(identity.clone(), fingerprint, self.origin)
            })
            .collect();
        Listing::new(self.origin, items)
    }
}

#[async_trait]
impl SourceFetcher for MemoryBucket {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        self.get(identity)
            .await
            .ok_or_else(|| TransferError::NotFound(identity.to_string()))
    }
}

#[async_trait]
impl DestinationWriter for MemoryBucket {
    async fn put(
        &self,
        identity: &str,
        bytes: Vec<u8>,
        fingerprint: &Fingerprint,
    ) -> Result<(), TransferError> {
        validate_identity(identity)?;
        self.objects.write().await.insert(
            identity.to_string(),
            StoredObject {
                bytes,
                token: fingerprint.token.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl DestinationDeleter for MemoryBucket {
    async fn delete(&self, identity: &str) -> Result<(), TransferError> {
        match self.objects.write().await.remove(identity) {
            Some(_) => Ok(()),
            None => Err(TransferError::NotFound(identity.to_string())),
        }
    }
}
