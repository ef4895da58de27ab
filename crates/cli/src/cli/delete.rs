use anyhow::Result;
use clap::Parser;
use rowdydaemon::RowdyDaemon;

#[derive(Parser)]
#[command(about = "Remove a container's alias, or tear down a sandbox's function and role")]
pub struct DeleteCommand {
    #[arg(help = "Container id, as reported by `observe` (function-name/qualifier)")]
    id: String,

    #[arg(long, help = "Role name to dispose of; required when deleting a sandbox ($LATEST)")]
    role_name: Option<String>,
}

impl DeleteCommand {
    pub async fn run(self, daemon: &RowdyDaemon) -> Result<()> {
        rowdydaemon::containers::remove_container(daemon, &self.id, self.role_name.as_deref()).await
    }
}
