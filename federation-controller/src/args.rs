use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Backup Orchestrator: expands MigrationSpecs into per-pod CheckpointRequests.
    Backup(BackupArgs),
    /// Restore Orchestrator: polls bindings and issues RestoreRequests.
    Restore(RestoreArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BackupArgs {
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// API group under which member clusters are aggregated as proxy subresources.
    #[arg(long, env = "FEDERATION_GROUP", default_value = "federation.example.io")]
    pub federation_group: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RestoreArgs {
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    #[arg(long, env = "FEDERATION_GROUP", default_value = "federation.example.io")]
    pub federation_group: String,

    /// How often to poll workload bindings for a removed source cluster.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 30)]
    pub poll_interval_secs: u64,
}
