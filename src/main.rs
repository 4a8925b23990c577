use anyhow::Context;
use bucket_sync::config::{read_config, write_config, SyncConfig};
use bucket_sync::pipeline::{sync_all, sync_dataset, sync_population, SyncOutcome};
use bucket_sync::reconciliation::{CancelSignal, ItemOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "bucket-sync.json";

/// Bucket Sync - keep an object bucket in step with a public dataset directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file (optional)
    #[arg(short, long, global = true, env = "BUCKET_SYNC_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Root directory of the destination bucket
    #[arg(long, global = true, env = "BUCKET_SYNC_BUCKET_ROOT")]
    bucket_root: Option<PathBuf>,

    /// Directory index URL of the dataset
    #[arg(long, global = true, env = "BUCKET_SYNC_SOURCE_URL")]
    source_url: Option<String>,

    /// Sync from a local directory instead of the dataset URL
    #[arg(long, global = true, env = "BUCKET_SYNC_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Maximum concurrent transfers
    #[arg(long, global = true, env = "BUCKET_SYNC_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror the dataset directory into the bucket
    Dataset {
        /// Compute the plan without touching the bucket
        #[arg(long)]
        dry_run: bool,
    },
    /// Land the normalized population snapshot
    Population {
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the dataset sync, then the population snapshot
    All {
        #[arg(long)]
        dry_run: bool,
    },
    /// Show what a dataset sync would do
    Plan,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Args {
    fn apply_overrides(&self, config: &mut SyncConfig) {
        if let Some(root) = &self.bucket_root {
            config.destination.bucket_root = root.clone();
        }
        if let Some(url) = &self.source_url {
            config.source.base_url = url.clone();
        }
        if let Some(dir) = &self.source_dir {
            config.source.local_dir = Some(dir.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.transfer.concurrency = concurrency;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = read_config(&args.config)
        .await
        .with_context(|| format!("Failed to read {}", args.config.display()))?
        .unwrap_or_default();
    args.apply_overrides(&mut config);

    let (cancel_tx, cancel) = CancelSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight transfers");
            let _ = cancel_tx.send(true);
        }
    });

    let (outcomes, error) = match &args.command {
        Command::Dataset { dry_run } => (vec![sync_dataset(&config, *dry_run, &cancel).await?], None),
        Command::Plan => (vec![sync_dataset(&config, true, &cancel).await?], None),
        Command::Population { dry_run } => {
            (vec![sync_population(&config, *dry_run, &cancel).await?], None)
        }
        Command::All { dry_run } => {
            let batch = sync_all(&config, *dry_run, &cancel).await;
            (batch.outcomes, batch.error)
        }
        Command::Init { force } => {
            if args.config.exists() && !force {
                anyhow::bail!("{} already exists (use --force)", args.config.display());
            }
            write_config(&args.config, &config).await?;
            info!("Wrote {}", args.config.display());
            return Ok(ExitCode::SUCCESS);
        }
    };

    // Whatever already ran is reported before a later step's error
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            print_outcome(outcome);
        }
    }

    if let Some(e) = error {
        return Err(e).context("Sync stopped before every namespace ran");
    }

    if outcomes.iter().any(SyncOutcome::has_failures) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    let s = &outcome.summary;
    println!(
        "[{}] upload {}, delete {}, unchanged {}{}",
        outcome.namespace,
        s.to_upload,
        s.to_delete,
        s.unchanged,
        if outcome.dry_run { " (dry run)" } else { "" }
    );

    if outcome.dry_run {
        for upload in &outcome.plan.to_upload {
            println!("  + {} ({:?})", upload.item.identity, upload.reason);
        }
        for item in &outcome.plan.to_delete {
            println!("  - {}", item.identity);
        }
        return;
    }

    if let Some(report) = &outcome.report {
        for (identity, result) in &report.outcomes {
            match result {
                ItemOutcome::Uploaded => println!("  uploaded  {identity}"),
                ItemOutcome::Deleted => println!("  deleted   {identity}"),
                ItemOutcome::Skipped => {}
                ItemOutcome::Failed { reason } => println!("  FAILED    {identity}: {reason}"),
            }
        }
    }
}
