pub mod converge;
pub mod delete;
pub mod observe;
pub mod pull;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rowdydaemon::RowdyDaemon;

use self::{converge::ConvergeCommand, delete::DeleteCommand, observe::ObserveCommand, pull::PullCommand};

/// Parses `pull`/`converge`/`observe`/`delete` with `clap` and calls straight into
/// `rowdy-daemon`; this crate holds no convergence or transfer logic of its own.
#[derive(Parser)]
#[command(version, about = "Turn OCI images into invocable Lambda functions")]
pub struct RowdyCommand {
    #[arg(
        long,
        default_value = "/var/lib/rowdy/config.toml",
        help = "Path to the rowdy configuration file"
    )]
    config: PathBuf,

    #[arg(
        long,
        default_value = "rowdy",
        help = "Namespace prefix used when naming IAM roles and Lambda functions"
    )]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Pull(PullCommand),
    Converge(ConvergeCommand),
    Observe(ObserveCommand),
    Delete(DeleteCommand),
}

impl RowdyCommand {
    pub async fn run(self) -> Result<()> {
        let daemon = RowdyDaemon::new(&self.config, self.namespace).await?;
        match self.command {
            Commands::Pull(pull) => pull.run(&daemon).await,
            Commands::Converge(converge) => converge.run(&daemon).await,
            Commands::Observe(observe) => observe.run(&daemon).await,
            Commands::Delete(delete) => delete.run(&daemon).await,
        }
    }
}
