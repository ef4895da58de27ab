use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rowdydaemon::{CreateContainerRequest, PullRequest, RowdyDaemon};

#[derive(Parser)]
#[command(about = "Pull an image and converge its IAM role, Lambda function, and alias/URL toward it")]
pub struct ConvergeCommand {
    #[arg(help = "Source image reference")]
    image: String,

    #[arg(long, help = "Reference to graft this image's layers on top of")]
    layers_from: Option<String>,

    #[arg(short, long, help = "Human name for the function; also used in its role name")]
    name: Option<String>,

    #[arg(short, long, help = "Memory, in MB, reserved for the function")]
    memory: Option<i32>,

    #[arg(long = "env", help = "Environment variable, KEY=VALUE; may be repeated")]
    env: Vec<String>,

    #[arg(long = "label", help = "Resource tag, KEY=VALUE; mirrored into the environment; may be repeated")]
    label: Vec<String>,

    #[arg(long, help = "Entrypoint override for the image")]
    entrypoint: Vec<String>,

    #[arg(short, long, help = "Working directory override for the image")]
    working_dir: Option<String>,

    #[arg(long, help = "Path to a JSON file of IAM policy statements the function's role should carry")]
    role_statements: Option<PathBuf>,

    #[arg(long, help = "Create a sandbox ($LATEST, no alias or public URL) instead of a container")]
    sandbox: bool,

    #[arg(allow_hyphen_values = true, trailing_var_arg = true, help = "Command override for the image")]
    command: Vec<String>,
}

impl ConvergeCommand {
    pub async fn run(self, daemon: &RowdyDaemon) -> Result<()> {
        let outcome = rowdydaemon::pull::pull_image(
            daemon,
            PullRequest {
                image: self.image,
                layers_from: self.layers_from,
                authorization: None,
            },
        )
        .await?;

        let role_statements = match self.role_statements {
            Some(path) => {
                let content = fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            None => Vec::new(),
        };

        let request = CreateContainerRequest {
            name: self.name,
            image_uri: outcome.image_ref,
            tag: outcome.tag,
            digest: outcome.digest,
            memory_mb: self.memory,
            command: self.entrypoint,
            args: self.command,
            env: parse_pairs(&self.env),
            labels: parse_pairs(&self.label),
            working_dir: self.working_dir,
            role_statements,
            is_sandbox: self.sandbox,
        };

        let arn = rowdydaemon::containers::create_container(daemon, request).await?;
        println!("{arn}");
        Ok(())
    }
}

fn parse_pairs(pairs: &[String]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        if let Some((key, value)) = pair.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}
