use super::plan::{ChangePlan, Upload};
use super::retry::RetryPolicy;
use crate::listing::Item;
use crate::transfer::{DestinationDeleter, DestinationWriter, SourceFetcher, TransferError};
use crate::utils::now_iso;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Terminal state of one identity after applying a plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    Uploaded,
    Deleted,
    Skipped,
    Failed { reason: String },
}

/// Outcome of every identity in a plan, keyed by identity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub started_at: String,
    pub finished_at: String,
    pub outcomes: BTreeMap<String, ItemOutcome>,
}

impl ApplyReport {
    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Uploaded))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Deleted))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Failed identities with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            ItemOutcome::Failed { reason } => Some((id.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome(&self, identity: &str) -> Option<&ItemOutcome> {
        self.outcomes.get(identity)
    }

    /// Fold another report in, e.g. when one run covers several prefixes
    pub fn merge(&mut self, other: ApplyReport) {
        if self.started_at.is_empty() || other.started_at < self.started_at {
            self.started_at = other.started_at;
        }
        if other.finished_at > self.finished_at {
            self.finished_at = other.finished_at;
        }
        self.outcomes.extend(other.outcomes);
    }
}

/// Knobs for applying a plan
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Maximum transfers in flight
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative cancellation, checked before each item starts
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Create a signal and the sender that trips it
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

enum Job {
    Upload(Upload),
    Delete(Item),
}

impl Job {
    fn identity(&self) -> &str {
        match self {
            Job::Upload(upload) => &upload.item.identity,
            Job::Delete(item) => &item.identity,
        }
    }
}

/// Directory-style ancestors of an identity: `a/b/c` yields `a`, `a/b`
fn path_ancestors(identity: &str) -> impl Iterator<Item = &str> {
    identity.match_indices('/').map(move |(i, _)| &identity[..i])
}

/// Split deletes that share a path with an upload (`series` vs
/// `series/pr.series`) from the rest of the work. Those must finish before
/// any upload starts or the upload trips over the old object.
fn schedule(plan: ChangePlan) -> (Vec<Job>, Vec<Job>) {
    let upload_ids: BTreeSet<String> = plan
        .to_upload
        .iter()
        .map(|upload| upload.item.identity.clone())
        .collect();
    let upload_dirs: BTreeSet<&str> = upload_ids
        .iter()
        .flat_map(|id| path_ancestors(id))
        .collect();

    let (blocking, deletes): (Vec<Item>, Vec<Item>) =
        plan.to_delete.into_iter().partition(|item| {
            upload_dirs.contains(item.identity.as_str())
                || path_ancestors(&item.identity).any(|dir| upload_ids.contains(dir))
        });

    let first = blocking.into_iter().map(Job::Delete).collect();
    let second = plan
        .to_upload
        .into_iter()
        .map(Job::Upload)
        .chain(deletes.into_iter().map(Job::Delete))
        .collect();
    (first, second)
}

/// Shared handles for the transfer tasks of one run
struct Workers {
    fetcher: Arc<dyn SourceFetcher>,
    writer: Arc<dyn DestinationWriter>,
    deleter: Arc<dyn DestinationDeleter>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl Workers {
    /// Run jobs on the bounded pool and wait for all of them
    async fn run(&self, jobs: Vec<Job>, cancel: &CancelSignal, report: &mut ApplyReport) {
        let mut tasks = JoinSet::new();
        let mut jobs = jobs.into_iter();

        while let Some(job) = jobs.next() {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if cancel.is_cancelled() {
                warn!("Run cancelled, leaving remaining items untouched");
                for pending in std::iter::once(job).chain(jobs.by_ref()) {
                    report.outcomes.insert(
                        pending.identity().to_string(),
                        ItemOutcome::Failed {
                            reason: "cancelled".to_string(),
                        },
                    );
                }
                break;
            }

            let fetcher = self.fetcher.clone();
            let writer = self.writer.clone();
            let deleter = self.deleter.clone();
            let retry = self.retry;

            tasks.spawn(async move {
                let _permit = permit;
                match job {
                    Job::Upload(upload) => {
                        let outcome =
                            run_upload(&upload, fetcher.as_ref(), writer.as_ref(), &retry).await;
                        (upload.item.identity, outcome)
                    }
                    Job::Delete(item) => {
                        let outcome = run_delete(&item, deleter.as_ref(), &retry).await;
                        (item.identity, outcome)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((identity, outcome)) => {
                    report.outcomes.insert(identity, outcome);
                }
                Err(e) => warn!(error = %e, "Transfer task aborted"),
            }
        }
    }
}

/// Apply a plan against the destination.
///
/// Every identity in the plan ends up in the report. Transfer failures are
/// recorded per item and never stop the batch. Once `cancel` fires, items
/// not yet started are reported as failed without being touched.
pub async fn apply(
    plan: ChangePlan,
    fetcher: Arc<dyn SourceFetcher>,
    writer: Arc<dyn DestinationWriter>,
    deleter: Arc<dyn DestinationDeleter>,
    options: &TransferOptions,
    cancel: &CancelSignal,
) -> ApplyReport {
    let mut report = ApplyReport {
        started_at: now_iso(),
        ..Default::default()
    };

    for item in &plan.unchanged {
        debug!(identity = %item.identity, "Unchanged, skipping");
        report
            .outcomes
            .insert(item.identity.clone(), ItemOutcome::Skipped);
    }

    let (first, second) = schedule(plan);

    // Anything a task never reports back on stays failed
    for job in first.iter().chain(second.iter()) {
        report.outcomes.insert(
            job.identity().to_string(),
            ItemOutcome::Failed {
                reason: "transfer did not complete".to_string(),
            },
        );
    }

    let workers = Workers {
        fetcher,
        writer,
        deleter,
        retry: options.retry,
        semaphore: Arc::new(Semaphore::new(options.concurrency.max(1))),
    };

    if !first.is_empty() {
        debug!(count = first.len(), "Clearing paths reused by uploads");
        workers.run(first, cancel, &mut report).await;
    }
    workers.run(second, cancel, &mut report).await;

    report.finished_at = now_iso();
    info!(
        uploaded = report.uploaded(),
        deleted = report.deleted(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Plan applied"
    );
    report
}

async fn run_upload(
    upload: &Upload,
    fetcher: &dyn SourceFetcher,
    writer: &dyn DestinationWriter,
    retry: &RetryPolicy,
) -> ItemOutcome {
    let identity = upload.item.identity.as_str();
    let fingerprint = &upload.item.fingerprint;

    let bytes = match retry.run("fetch", identity, || fetcher.fetch(identity)).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(identity = %identity, error = %e, "Fetch failed");
            return ItemOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    let size = bytes.len();
    match retry
        .run("upload", identity, || writer.put(identity, bytes.clone(), fingerprint))
        .await
    {
        Ok(()) => {
            info!(identity = %identity, bytes = size, reason = ?upload.reason, "Uploaded");
            ItemOutcome::Uploaded
        }
        Err(e) => {
            warn!(identity = %identity, error = %e, "Upload failed");
            ItemOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

async fn run_delete(item: &Item, deleter: &dyn DestinationDeleter, retry: &RetryPolicy) -> ItemOutcome {
    let identity = item.identity.as_str();

    match retry.run("delete", identity, || deleter.delete(identity)).await {
        Ok(()) => {
            info!(identity = %identity, "Deleted");
            ItemOutcome::Deleted
        }
        Err(TransferError::NotFound(_)) => {
            debug!(identity = %identity, "Already absent");
            ItemOutcome::Deleted
        }
        Err(e) => {
            warn!(identity = %identity, error = %e, "Delete failed");
            ItemOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}
