mod fs;
mod manifest;
mod memory;

pub use fs::FsBucket;
pub use manifest::{read_manifest, write_manifest, BucketManifest, ManifestError, ObjectEntry};
pub use memory::MemoryBucket;
