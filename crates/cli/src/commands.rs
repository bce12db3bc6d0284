use clap::{Args, Subcommand, ValueEnum};

#[derive(Subcommand)]
pub enum Commands {
    /// Claim and migrate shards until no claimable work remains.
    Migrate {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        #[arg(long, help = "Bulk endpoint base URL of the target cluster")]
        target: String,

        #[arg(
            long,
            help = "Base snapshot for a delta run; only documents new since this generation are sent"
        )]
        base_snapshot: Option<String>,

        #[arg(
            long,
            value_enum,
            help = "Which documents a delta run carries over; requires --base-snapshot"
        )]
        delta_policy: Option<DeltaPolicyArg>,
    },
    /// Populate the work item registry for a snapshot without migrating.
    Prepare {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show the work items of a snapshot and their lease/completion state.
    Status {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long, help = "Print the status as JSON instead of a table")]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DeltaPolicyArg {
    /// Send only documents new or updated since the base generation.
    UpdatesOnly,
}

#[derive(Args)]
pub struct CommonArgs {
    #[arg(long, help = "Path of the shared coordination store")]
    pub store: String,

    #[arg(long, help = "Root directory of the snapshot repository")]
    pub repo: String,

    #[arg(long, help = "Snapshot generation to operate on")]
    pub snapshot: String,

    #[arg(
        long = "index",
        help = "Restrict to this index; repeatable. Default is every index in the snapshot"
    )]
    pub indices: Vec<String>,
}

#[derive(Args)]
pub struct TuningArgs {
    #[arg(long, help = "Shards larger than this are skipped, not migrated")]
    pub max_shard_size_bytes: Option<u64>,

    #[arg(long, help = "Lease duration granted on the first claim of a shard")]
    pub initial_lease_secs: Option<u64>,

    #[arg(long, help = "Clock skew tolerated when judging lease expiry")]
    pub clock_skew_slack_secs: Option<u64>,

    #[arg(long, help = "Maximum documents per bulk batch")]
    pub max_docs_per_batch: Option<usize>,

    #[arg(long, help = "Maximum serialized bytes per bulk batch")]
    pub max_bytes_per_batch: Option<usize>,

    #[arg(long, help = "Maximum bulk batches in flight at once")]
    pub max_concurrent_batches: Option<usize>,
}
