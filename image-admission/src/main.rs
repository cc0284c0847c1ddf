use anyhow::Result;
use clap::Parser;

mod admission;
mod args;
mod error;
mod server;
mod wire;

use args::ServerArgs;

#[tokio::main]
async fn main() -> Result<()> {
    migration_common::init();
    tracing_subscriber::fmt::init();

    let args = ServerArgs::parse();
    let client = kube::Client::try_default().await?;

    server::run(client, args.port).await?;
    Ok(())
}
