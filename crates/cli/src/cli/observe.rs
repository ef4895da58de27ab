use anyhow::Result;
use clap::Parser;
use rowdydaemon::{ContainerFilter, RowdyDaemon};

#[derive(Parser)]
#[command(about = "List the containers and sandboxes this namespace manages")]
pub struct ObserveCommand {
    #[arg(long, help = "Only show the container with this id")]
    id: Option<String>,

    #[arg(long = "label", help = "Only show containers carrying this tag, KEY=VALUE; may be repeated")]
    label: Vec<String>,
}

impl ObserveCommand {
    pub async fn run(self, daemon: &RowdyDaemon) -> Result<()> {
        let mut label_selector = std::collections::BTreeMap::new();
        for pair in &self.label {
            if let Some((key, value)) = pair.split_once('=') {
                label_selector.insert(key.to_string(), value.to_string());
            }
        }

        let filter = ContainerFilter { id: self.id, label_selector };
        let containers = rowdydaemon::containers::list_containers(daemon, &filter).await?;

        for container in &containers {
            let payload = serde_json::json!({
                "id": container.id,
                "name": container.name,
                "imageUri": container.image_uri,
                "qualifier": container.qualifier,
                "functionArn": container.function_arn,
                "functionUrl": container.function_url,
                "labels": container.labels,
            });
            println!("{}", serde_json::to_string(&payload)?);
        }
        Ok(())
    }
}
