mod hash;

pub use hash::{compute_file_hash, compute_hash};

use std::path::Path;

/// Sidecar file inside a bucket prefix that records object metadata
pub const MANIFEST_FILE: &str = ".bucket-manifest.json";

/// Suffix used for in-flight object writes
pub const TEMP_SUFFIX: &str = ".part";

/// Current bucket-sync version
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the path to the manifest file of a bucket prefix
pub fn get_manifest_path(prefix_root: &Path) -> std::path::PathBuf {
    prefix_root.join(MANIFEST_FILE)
}

/// Get current timestamp in ISO 8601 format
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Whether a bucket-relative path is bookkeeping rather than an object
pub fn is_internal_path(relative: &str) -> bool {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    name.starts_with(MANIFEST_FILE) || name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_internal_path() {
        assert!(is_internal_path(".bucket-manifest.json"));
        assert!(is_internal_path("bls/.bucket-manifest.json.tmp"));
        assert!(is_internal_path("nested/pr.class.0a1b.part"));
        assert!(!is_internal_path("pr.class"));
        assert!(!is_internal_path("nested/pr.data.0.Current"));
    }
}
