use anyhow::Result;
use clap::Parser;

mod actions;
mod args;
mod error;
mod naming;
mod nodeagent;
mod pipeline;
mod pod;
mod reconcile;
mod scheduler;

use args::NodeArgs;

#[tokio::main]
async fn main() -> Result<()> {
    migration_common::init();
    tracing_subscriber::fmt::init();

    let node = NodeArgs::parse();
    let client = kube::Client::try_default().await?;

    reconcile::run(client, node).await?;
    Ok(())
}
