use crate::listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
use crate::transfer::{validate_identity, SourceFetcher, TransferError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// IIS-style listing line: `3/28/2025  8:30 AM   462 <A HREF="/pub/.../pr.class">pr.class</A>`
static IIS_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(\d{1,2}/\d{1,2}/\d{4}\s+\d{1,2}:\d{2}\s*[AP]M)\s+(\d+|&lt;dir&gt;|<dir>)\s+<a\s+href="([^"]+)"\s*>([^<]*)</a>"#,
    )
    .expect("valid IIS index regex")
});

/// Apache autoindex line: `<a href="pr.class">pr.class</a>   2025-03-28 08:30  462`
static APACHE_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<a\s+href="([^"?]+)"\s*>[^<]*</a>\s+(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}(?::\d{2})?)\s+(\S+)"#,
    )
    .expect("valid Apache index regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// A file row parsed from a directory index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub size: Option<u64>,
    pub modified: String,
}

/// Extract file entries from a directory index page.
///
/// Subdirectories and parent links are skipped. A page with no entries is
/// only accepted when it carries a parent-directory link; anything else is
/// treated as not being an index at all, so an error page can never empty
/// the bucket.
pub fn parse_directory_index(body: &str) -> Result<Vec<IndexEntry>, ListingError> {
    let mut entries: Vec<IndexEntry> = IIS_ENTRY
        .captures_iter(body)
        .filter_map(|caps| {
            let href = caps.get(3)?.as_str();
            let size = caps.get(2)?.as_str();
            if href.ends_with('/') || size.contains("dir") {
                return None;
            }
            Some(IndexEntry {
                name: file_name_from_href(href)?,
                size: size.parse().ok(),
                modified: normalize_token(caps.get(1)?.as_str()),
            })
        })
        .collect();

    if entries.is_empty() {
        entries = APACHE_ENTRY
            .captures_iter(body)
            .filter_map(|caps| {
                let href = caps.get(1)?.as_str();
                if href.ends_with('/') || href.starts_with("..") {
                    return None;
                }
                Some(IndexEntry {
                    name: file_name_from_href(href)?,
                    // Apache rounds sizes like "1.2M"; only exact byte counts are kept
                    size: caps.get(3)?.as_str().parse().ok(),
                    modified: normalize_token(caps.get(2)?.as_str()),
                })
            })
            .collect();
    }

    if entries.is_empty() && !body.to_ascii_lowercase().contains("parent directory") {
        return Err(ListingError::Malformed(
            "response does not look like a directory index".to_string(),
        ));
    }

    Ok(entries)
}

fn file_name_from_href(href: &str) -> Option<String> {
    let name = href.rsplit('/').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn normalize_token(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Crawls a public dataset directory over HTTP.
///
/// Fingerprints are the size and timestamp shown in the index, so change
/// detection never downloads content.
#[derive(Debug, Clone)]
pub struct HttpDirectorySource {
    client: Client,
    base_url: String,
}

impl HttpDirectorySource {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, ListingError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Lister for HttpDirectorySource {
    async fn list(&self) -> Result<Listing, ListingError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| ListingError::Unavailable(format!("{}: {}", self.base_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Unavailable(format!(
                "{} returned {}",
                self.base_url, status
            )));
        }

        let body = response.text().await?;
        let entries = parse_directory_index(&body)?;
        if entries.is_empty() {
            warn!(url = %self.base_url, "Directory index has no files");
        }

        let items = entries
            .into_iter()
            .map(|entry| {
                Item::new(
                    entry.name,
                    Fingerprint::from_token(entry.modified, entry.size),
                    Origin::Source,
                )
            })
            .collect();

        let listing = Listing::new(Origin::Source, items)?;
        debug!(url = %self.base_url, count = listing.len(), "Listed source directory");
        Ok(listing)
    }
}

#[async_trait]
impl SourceFetcher for HttpDirectorySource {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        validate_identity(identity)?;
        let url = format!("{}{}", self.base_url, identity);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransferError::FetchFailed(identity.to_string(), e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TransferError::NotFound(identity.to_string()));
        }
        if !status.is_success() {
            return Err(TransferError::FetchFailed(
                identity.to_string(),
                format!("status {status}"),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
