mod execute;
mod plan;
mod retry;

pub use execute::{
    apply, ApplyReport, CancelSignal, ItemOutcome, TransferOptions, DEFAULT_CONCURRENCY,
};
pub use plan::{reconcile, ChangePlan, PlanError, PlanSummary, Upload, UploadReason};
pub use retry::{
    RetryPolicy, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS,
};
