use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use rowdycli::cli::RowdyCommand;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    RowdyCommand::parse().run().await
}
