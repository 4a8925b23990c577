//! End-to-end runs: list both sides, reconcile, apply.

use crate::bucket::FsBucket;
use crate::config::{ConfigError, SyncConfig};
use crate::listing::{Lister, ListingError};
use crate::normalize::{population_schema, NormalizeError, NormalizedRecord, Normalizer, PopulationClient};
use crate::reconciliation::{
    apply, reconcile, ApplyReport, CancelSignal, ChangePlan, PlanError, PlanSummary,
    TransferOptions,
};
use crate::source::{HttpDirectorySource, LocalDirectorySource};
use crate::transfer::{DestinationDeleter, DestinationWriter, SourceFetcher};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Run-level failures. Each one means nothing in the destination was touched.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    ListingUnavailable(#[from] ListingError),

    #[error("{0}")]
    MalformedPayload(#[from] NormalizeError),

    #[error("Plan error: {0}")]
    PlanError(#[from] PlanError),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Result of one namespace's run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub namespace: String,
    pub dry_run: bool,
    pub summary: PlanSummary,
    pub plan: ChangePlan,
    /// Absent for dry runs
    pub report: Option<ApplyReport>,
}

impl SyncOutcome {
    pub fn has_failures(&self) -> bool {
        self.report.as_ref().is_some_and(ApplyReport::has_failures)
    }
}

/// Sync `destination` to match `source`.
///
/// Both sides are listed concurrently; a listing failure on either aborts
/// before anything is written.
pub async fn sync_listings<S, D>(
    namespace: &str,
    source: Arc<S>,
    destination: Arc<D>,
    options: &TransferOptions,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<SyncOutcome, PipelineError>
where
    S: Lister + SourceFetcher + 'static,
    D: Lister + DestinationWriter + DestinationDeleter + 'static,
{
    let (source_listing, destination_listing) =
        tokio::try_join!(source.list(), destination.list())?;

    info!(
        namespace = %namespace,
        source = source_listing.len(),
        destination = destination_listing.len(),
        "Listings captured"
    );

    let plan = reconcile(&source_listing, &destination_listing)?;
    finish(namespace, plan, source, destination, options, dry_run, cancel).await
}

/// Land a normalized record under its fixed identity.
///
/// Only the record's own key is reconciled, so other objects under the same
/// prefix are never deleted.
pub async fn sync_record<D>(
    namespace: &str,
    record: NormalizedRecord,
    destination: Arc<D>,
    options: &TransferOptions,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<SyncOutcome, PipelineError>
where
    D: Lister + DestinationWriter + DestinationDeleter + 'static,
{
    let destination_listing = destination
        .list()
        .await?
        .narrowed_to([record.identity.as_str()]);

    let plan = reconcile(&record.as_listing()?, &destination_listing)?;
    finish(namespace, plan, Arc::new(record), destination, options, dry_run, cancel).await
}

async fn finish<S, D>(
    namespace: &str,
    plan: ChangePlan,
    source: Arc<S>,
    destination: Arc<D>,
    options: &TransferOptions,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<SyncOutcome, PipelineError>
where
    S: SourceFetcher + 'static,
    D: DestinationWriter + DestinationDeleter + 'static,
{
    let summary = plan.summary();
    info!(
        namespace = %namespace,
        to_upload = summary.to_upload,
        to_delete = summary.to_delete,
        unchanged = summary.unchanged,
        dry_run,
        "Plan ready"
    );

    let report = if dry_run {
        None
    } else {
        Some(
            apply(
                plan.clone(),
                source,
                destination.clone(),
                destination,
                options,
                cancel,
            )
            .await,
        )
    };

    Ok(SyncOutcome {
        namespace: namespace.to_string(),
        dry_run,
        summary,
        plan,
        report,
    })
}

/// Mirror the dataset directory into the dataset prefix
pub async fn sync_dataset(
    config: &SyncConfig,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<SyncOutcome, PipelineError> {
    config.validate()?;
    let namespace = config.destination.dataset_prefix.clone();
    let destination = Arc::new(FsBucket::new(
        &config.destination.bucket_root,
        &config.destination.dataset_prefix,
    ));
    let options = config.transfer_options();

    match &config.source.local_dir {
        Some(dir) => {
            let source = Arc::new(LocalDirectorySource::new(dir));
            sync_listings(&namespace, source, destination, &options, dry_run, cancel).await
        }
        None => {
            let source = Arc::new(HttpDirectorySource::new(
                &config.source.base_url,
                &config.source.user_agent,
                config.request_timeout(),
            )?);
            sync_listings(&namespace, source, destination, &options, dry_run, cancel).await
        }
    }
}

/// Build the normalizer configured for the population snapshot
pub fn population_normalizer(config: &SyncConfig) -> Normalizer {
    let schema = config
        .population
        .schema
        .clone()
        .unwrap_or_else(population_schema);

    let normalizer = Normalizer::new(schema, &config.population.key);
    if config.population.records_field.is_empty() {
        normalizer
    } else {
        normalizer.with_records_field(&config.population.records_field)
    }
}

/// Fetch, normalize, and land the population snapshot
pub async fn sync_population(
    config: &SyncConfig,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<SyncOutcome, PipelineError> {
    config.validate()?;
    let client = PopulationClient::new(
        &config.population.url,
        &config.source.user_agent,
        config.request_timeout(),
    )?;

    let payload = client.fetch_payload().await?;
    let record = population_normalizer(config).normalize(&payload)?;
    info!(
        identity = %record.identity,
        rows = record.rows.len(),
        fingerprint = %record.fingerprint,
        "Population payload normalized"
    );

    let destination = Arc::new(FsBucket::new(
        &config.destination.bucket_root,
        &config.destination.population_prefix,
    ));
    sync_record(
        &config.destination.population_prefix,
        record,
        destination,
        &config.transfer_options(),
        dry_run,
        cancel,
    )
    .await
}

/// Result of running every namespace back to back
#[derive(Debug)]
pub struct BatchOutcome {
    /// Namespaces that ran to completion, in run order
    pub outcomes: Vec<SyncOutcome>,
    /// Run-level error that stopped the batch, if any
    pub error: Option<PipelineError>,
}

impl BatchOutcome {
    pub fn has_failures(&self) -> bool {
        self.error.is_some() || self.outcomes.iter().any(SyncOutcome::has_failures)
    }
}

/// Dataset sync followed by the population snapshot.
///
/// A dataset listing failure stops the batch before the population step.
/// When the population step fails, the dataset outcome is still returned
/// next to the error, since the bucket has already changed.
pub async fn sync_all(config: &SyncConfig, dry_run: bool, cancel: &CancelSignal) -> BatchOutcome {
    let mut outcomes = Vec::new();

    match sync_dataset(config, dry_run, cancel).await {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) => {
            return BatchOutcome {
                outcomes,
                error: Some(e),
            }
        }
    }

    let error = match sync_population(config, dry_run, cancel).await {
        Ok(outcome) => {
            outcomes.push(outcome);
            None
        }
        Err(e) => Some(e),
    };

    BatchOutcome { outcomes, error }
}
