use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which side of a sync an item was listed from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Source,
    Destination,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Source => write!(f, "source"),
            Origin::Destination => write!(f, "destination"),
        }
    }
}

/// Metadata used to detect content change without downloading content.
///
/// Any field may be missing; see [`Fingerprint::matches`] for how partial
/// fingerprints compare.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hex SHA-256 of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Opaque modification token (last-modified string, etag)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Fingerprint {
    pub fn from_hash(hash: impl Into<String>, size: u64) -> Self {
        Self {
            size: Some(size),
            hash: Some(hash.into()),
            token: None,
        }
    }

    pub fn from_token(token: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            size,
            hash: None,
            token: Some(token.into()),
        }
    }

    /// True when neither a hash nor a token is known
    pub fn is_unknown(&self) -> bool {
        self.hash.is_none() && self.token.is_none()
    }

    /// Compare two fingerprints.
    ///
    /// Hashes win when both sides have one; tokens are used next. Size only
    /// ever vetoes a match. Anything else is not a match, so callers
    /// re-transfer rather than skip.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        let sizes_agree = match (self.size, other.size) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };

        if let (Some(a), Some(b)) = (&self.hash, &other.hash) {
            return a == b && sizes_agree;
        }

        match (&self.token, &other.token) {
            (Some(a), Some(b)) => a == b && sizes_agree,
            _ => false,
        }
    }

    /// Fill fields missing here from `other`
    pub fn merged_with(mut self, other: &Fingerprint) -> Self {
        if self.size.is_none() {
            self.size = other.size;
        }
        if self.hash.is_none() {
            self.hash = other.hash.clone();
        }
        if self.token.is_none() {
            self.token = other.token.clone();
        }
        self
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(hash) = &self.hash {
            parts.push(format!("sha256:{}", hash.chars().take(12).collect::<String>()));
        }
        if let Some(token) = &self.token {
            parts.push(format!("token:{token}"));
        }
        if let Some(size) = self.size {
            parts.push(format!("{size}B"));
        }
        if parts.is_empty() {
            write!(f, "unknown")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// A single listed object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub identity: String,
    pub fingerprint: Fingerprint,
    pub origin: Origin,
}

impl Item {
    pub fn new(identity: impl Into<String>, fingerprint: Fingerprint, origin: Origin) -> Self {
        Self {
            identity: identity.into(),
            fingerprint,
            origin,
        }
    }
}

/// Snapshot of one side, keyed by identity.
///
/// Listings are never mutated after construction; narrowing produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    origin: Origin,
    captured_at: String,
    items: BTreeMap<String, Item>,
}

impl Listing {
    /// Build a listing, rejecting duplicate identities and items from the
    /// wrong side
    pub fn new(origin: Origin, items: Vec<Item>) -> Result<Self, super::ListingError> {
        let mut map = BTreeMap::new();
        for item in items {
            if item.origin != origin {
                return Err(super::ListingError::Malformed(format!(
                    "{} item '{}' in {} listing",
                    item.origin, item.identity, origin
                )));
            }
            if map.contains_key(&item.identity) {
                return Err(super::ListingError::DuplicateIdentity(item.identity));
            }
            map.insert(item.identity.clone(), item);
        }

        Ok(Self {
            origin,
            captured_at: crate::utils::now_iso(),
            items: map,
        })
    }

    pub fn empty(origin: Origin) -> Self {
        Self {
            origin,
            captured_at: crate::utils::now_iso(),
            items: BTreeMap::new(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn captured_at(&self) -> &str {
        &self.captured_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&Item> {
        self.items.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.items.contains_key(identity)
    }

    /// Items in identity order
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// A new listing holding only the given identities
    pub fn narrowed_to<'a>(&self, identities: impl IntoIterator<Item = &'a str>) -> Listing {
        let items = identities
            .into_iter()
            .filter_map(|id| self.items.get(id).map(|item| (id.to_string(), item.clone())))
            .collect();

        Listing {
            origin: self.origin,
            captured_at: self.captured_at.clone(),
            items,
        }
    }
}
