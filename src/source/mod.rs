mod http;
mod local;

pub use http::{parse_directory_index, HttpDirectorySource, IndexEntry};
pub use local::LocalDirectorySource;
