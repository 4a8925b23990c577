//! I/O seams used by the executor to move bytes.

use crate::listing::Fingerprint;
use async_trait::async_trait;
use thiserror::Error;

/// Per-item transfer failure. These never abort a run; the executor records
/// them in the report.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Fetch failed for {0}: {1}")]
    FetchFailed(String, String),

    #[error("Write failed for {0}: {1}")]
    WriteFailed(String, String),

    #[error("Delete failed for {0}: {1}")]
    DeleteFailed(String, String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TransferError {
    /// Missing objects are permanent; everything else may be worth a retry
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransferError::NotFound(_) | TransferError::InvalidIdentity(_)
        )
    }
}

/// Reads the bytes of a source item
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError>;
}

/// Writes an object to the destination.
///
/// `fingerprint` is the source fingerprint of the bytes; stores keep it as
/// object metadata so later listings can be compared against the source.
/// A put must leave either the complete new object or the previous state.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    async fn put(
        &self,
        identity: &str,
        bytes: Vec<u8>,
        fingerprint: &Fingerprint,
    ) -> Result<(), TransferError>;
}

/// Removes an object from the destination. Returns
/// [`TransferError::NotFound`] when the object is already absent.
#[async_trait]
pub trait DestinationDeleter: Send + Sync {
    async fn delete(&self, identity: &str) -> Result<(), TransferError>;
}

/// Reject identities that could escape a bucket prefix
pub fn validate_identity(identity: &str) -> Result<(), TransferError> {
    let bad = identity.is_empty()
        || identity.starts_with('/')
        || identity.contains('\\')
        || identity
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");

    if bad || crate::utils::is_internal_path(identity) {
        return Err(TransferError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}
