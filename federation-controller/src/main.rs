use anyhow::Result;
use clap::Parser;

mod args;
mod backup;
mod error;
mod naming;
mod restore;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    migration_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = kube::Client::try_default().await?;

    match cli.command {
        Commands::Backup(args) => backup::run(client, args).await?,
        Commands::Restore(args) => restore::run(client, args).await?,
    }
    Ok(())
}
