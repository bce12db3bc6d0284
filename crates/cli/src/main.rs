use crate::commands::{Commands, CommonArgs, DeltaPolicyArg, TuningArgs};
use crate::error::CliError;
use crate::shutdown::{ExitCode, ShutdownCoordinator};
use clap::Parser;
use engine_core::clients::bulk::BulkWriteClient;
use engine_core::clients::opensearch::OpenSearchBulkClient;
use engine_core::config::{DeltaPolicy, MigrationSettings};
use engine_core::coordination::CoordinationStore;
use engine_core::coordination::coordinator::{CoordinatorConfig, WorkCoordinator};
use engine_core::coordination::models::WorkItemRecord;
use engine_core::coordination::preparer::{PreparerConfig, RegistryPreparer};
use engine_core::coordination::sled_store::SledCoordinationStore;
use engine_core::retry::RetryPolicy;
use engine_core::snapshot::blob::{FsBlobAccess, SnapshotBlobAccess};
use engine_core::snapshot::catalog::{FsSnapshotCatalog, ShardMetadataSource};
use engine_runtime::worker::{MigrationOutcome, ShardWorker};
use model::core::identifiers::WorkerId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "shardlift",
    version = "0.1.0",
    about = "Snapshot shard migration tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::Migrate {
            common,
            tuning,
            target,
            base_snapshot,
            delta_policy,
        } => migrate(common, tuning, target, base_snapshot, delta_policy).await,
        Commands::Prepare { common } => prepare(common).await,
        Commands::Status { common, json } => status(common, json).await,
    }
}

async fn migrate(
    common: CommonArgs,
    tuning: TuningArgs,
    target: String,
    base_snapshot: Option<String>,
    delta_policy: Option<DeltaPolicyArg>,
) -> Result<ExitCode, CliError> {
    let settings = build_settings(&common, &tuning, base_snapshot, delta_policy);
    settings.validate()?;
    let delta = settings.is_delta();

    let store = open_store(&common.store)?;
    let blobs: Arc<dyn SnapshotBlobAccess> = Arc::new(FsBlobAccess::new(&common.repo));
    let catalog: Arc<dyn ShardMetadataSource> = Arc::new(FsSnapshotCatalog::new(blobs.clone()));
    let client: Arc<dyn BulkWriteClient> =
        Arc::new(OpenSearchBulkClient::new(target, RetryPolicy::for_bulk_writes()));

    let cancel = CancellationToken::new();
    let shutdown = ShutdownCoordinator::new(cancel.clone());
    shutdown.register_handlers();

    let worker = ShardWorker::new(settings, store, catalog, blobs, client, cancel);
    info!(worker = %worker.worker_id(), snapshot = %common.snapshot, delta, "Worker starting");

    let outcome = worker.run().await?;
    let metrics = worker.metrics().snapshot();
    info!(
        shards = metrics.shards_completed,
        docs = metrics.docs_dispatched,
        bytes = metrics.bytes_dispatched,
        batches = metrics.batches_dispatched,
        failures = metrics.failure_count,
        "Worker finished"
    );

    Ok(match outcome {
        MigrationOutcome::LeaseLost => ExitCode::LeaseLost,
        _ if shutdown.is_shutdown_requested() => ExitCode::ShutdownRequested,
        _ => ExitCode::Success,
    })
}

async fn prepare(common: CommonArgs) -> Result<ExitCode, CliError> {
    let store = open_store(&common.store)?;
    let blobs: Arc<dyn SnapshotBlobAccess> = Arc::new(FsBlobAccess::new(&common.repo));
    let catalog: Arc<dyn ShardMetadataSource> = Arc::new(FsSnapshotCatalog::new(blobs));

    let preparer = RegistryPreparer::new(store, catalog, PreparerConfig::default());
    preparer
        .ensure_work_items_exist(&common.snapshot, &common.indices, &WorkerId::generate())
        .await?;

    info!(snapshot = %common.snapshot, "Work item registry is populated");
    Ok(ExitCode::Success)
}

async fn status(common: CommonArgs, as_json: bool) -> Result<ExitCode, CliError> {
    let store = open_store(&common.store)?;
    let coordinator = WorkCoordinator::new(
        store,
        CoordinatorConfig {
            snapshot: common.snapshot.clone(),
            initial_lease: MigrationSettings::default().initial_lease(),
            clock_skew_slack: MigrationSettings::default().clock_skew_slack(),
        },
    );

    let items = coordinator.list_items().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        print_status_table(&common.snapshot, &items);
    }
    Ok(ExitCode::Success)
}

fn print_status_table(snapshot: &str, items: &[WorkItemRecord]) {
    println!("Work items for snapshot '{snapshot}':");
    println!("{:<40} {:<10} {:<9} {}", "Item", "State", "Attempts", "Lease");
    for item in items {
        let state = if item.completed { "complete" } else { "pending" };
        let lease = match &item.lease {
            Some(lease) => format!("{} until {}", lease.owner, lease.expires_at.to_rfc3339()),
            None => "-".to_string(),
        };
        println!("{:<40} {:<10} {:<9} {}", item.id.key(), state, item.attempts, lease);
    }
    let done = items.iter().filter(|i| i.completed).count();
    println!("{done}/{} complete", items.len());
}

fn build_settings(
    common: &CommonArgs,
    tuning: &TuningArgs,
    base_snapshot: Option<String>,
    delta_policy: Option<DeltaPolicyArg>,
) -> MigrationSettings {
    let defaults = MigrationSettings::default();
    MigrationSettings {
        snapshot: common.snapshot.clone(),
        index_allowlist: common.indices.clone(),
        max_shard_size_bytes: tuning
            .max_shard_size_bytes
            .unwrap_or(defaults.max_shard_size_bytes),
        initial_lease_secs: tuning
            .initial_lease_secs
            .unwrap_or(defaults.initial_lease_secs),
        clock_skew_slack_secs: tuning
            .clock_skew_slack_secs
            .unwrap_or(defaults.clock_skew_slack_secs),
        max_docs_per_batch: tuning
            .max_docs_per_batch
            .unwrap_or(defaults.max_docs_per_batch),
        max_bytes_per_batch: tuning
            .max_bytes_per_batch
            .unwrap_or(defaults.max_bytes_per_batch),
        max_concurrent_batches: tuning
            .max_concurrent_batches
            .unwrap_or(defaults.max_concurrent_batches),
        base_snapshot,
        delta_policy: delta_policy.map(|p| match p {
            DeltaPolicyArg::UpdatesOnly => DeltaPolicy::UpdatesOnly,
        }),
    }
}

fn open_store(path: &str) -> Result<Arc<dyn CoordinationStore>, CliError> {
    let store = SledCoordinationStore::open(path).map_err(|source| CliError::StoreOpen {
        path: path.to_string(),
        source,
    })?;
    Ok(Arc::new(store))
}
