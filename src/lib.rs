pub mod bucket;
pub mod config;
pub mod listing;
pub mod normalize;
pub mod pipeline;
pub mod reconciliation;
pub mod source;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use bucket::{FsBucket, MemoryBucket};
pub use config::{read_config, write_config, ConfigError, SyncConfig};
pub use listing::{Fingerprint, Item, Lister, Listing, ListingError, Origin};
pub use normalize::{
    population_schema, CanonicalSchema, FieldKind, FieldSpec, NormalizeError, NormalizedRecord,
    Normalizer,
};
pub use pipeline::{
    sync_all, sync_dataset, sync_listings, sync_population, sync_record, BatchOutcome,
    PipelineError, SyncOutcome,
};
pub use reconciliation::{
    apply, reconcile, ApplyReport, CancelSignal, ChangePlan, ItemOutcome, RetryPolicy,
    TransferOptions,
};
pub use source::{HttpDirectorySource, LocalDirectorySource};
pub use transfer::{DestinationDeleter, DestinationWriter, SourceFetcher, TransferError};
