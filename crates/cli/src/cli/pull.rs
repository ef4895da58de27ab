use anyhow::{anyhow, Result};
use clap::Parser;
use rowdydaemon::{PullOutcome, PullRequest, RowdyDaemon};
use rowdyoci::name::Authorization;

#[derive(Parser)]
#[command(about = "Transfer an image into the target registry without creating a function")]
pub struct PullCommand {
    #[arg(help = "Source image reference")]
    image: String,

    #[arg(long, help = "Reference to graft this image's layers on top of")]
    layers_from: Option<String>,

    #[arg(long, help = "Pre-obtained bearer token for the source registry")]
    bearer: Option<String>,

    #[arg(long, help = "Pre-obtained basic auth token for the source registry")]
    basic: Option<String>,
}

impl PullCommand {
    pub async fn run(self, daemon: &RowdyDaemon) -> Result<()> {
        let authorization = match (self.bearer, self.basic) {
            (Some(_), Some(_)) => return Err(anyhow!("--bearer and --basic are mutually exclusive")),
            (Some(token), None) => Some(Authorization::Bearer(token)),
            (None, Some(token)) => Some(Authorization::Basic(token)),
            (None, None) => None,
        };

        let outcome: PullOutcome = rowdydaemon::pull::pull_image(
            daemon,
            PullRequest {
                image: self.image,
                layers_from: self.layers_from,
                authorization,
            },
        )
        .await?;

        let payload = serde_json::json!({
            "imageRef": outcome.image_ref,
            "digest": outcome.digest,
            "tag": outcome.tag,
            "code": outcome.code,
            "reasons": outcome.reasons,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        Ok(())
    }
}
