mod types;

pub use types::{Fingerprint, Item, Listing, Origin};

use async_trait::async_trait;
use thiserror::Error;

/// Failures while enumerating either side. Any of these aborts a run before
/// anything is mutated.
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Listing unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed listing: {0}")]
    Malformed(String),

    #[error("Duplicate identity in listing: {0}")]
    DuplicateIdentity(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Anything that can enumerate its items as a [`Listing`].
///
/// Listing must not have side effects.
#[async_trait]
pub trait Lister: Send + Sync {
    async fn list(&self) -> Result<Listing, ListingError>;
}
