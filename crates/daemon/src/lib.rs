pub mod containers;
pub mod pull;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;
use rowdy_core::config::RowdyConfig;
use rowdyaws::AwsClients;
use rowdyoci::auth::AuthBroker;
use rowdyoci::client::RegistryClient;

pub use containers::{Container, ContainerFilter, CreateContainerRequest};
pub use pull::{PullOutcome, PullRequest};

/// Everything `PullImage`/`CreateContainer`/`ListContainers`/`RemoveContainer`
/// (§6's downstream CRI contract) need, composed once at startup. There is no
/// gRPC service shell here — that routing layer is out of scope (§1) — so this
/// struct is the whole of what a caller (the `rowdy` CLI, or any other
/// embedder) talks to directly.
pub struct RowdyDaemon {
    pub config: RowdyConfig,
    pub namespace: String,
    pub registry_client: Arc<RegistryClient>,
    pub aws: AwsClients,
}

impl RowdyDaemon {
    /// Loads configuration from `config_path` (falling back to and writing
    /// defaults when absent, per `RowdyConfig::load`), resolves the AWS credential
    /// chain, and builds the shared `RegistryClient` every transfer and ECR login
    /// reuses.
    pub async fn new(config_path: &Path, namespace: impl Into<String>) -> Result<RowdyDaemon> {
        let config = RowdyConfig::load(config_path).await?;
        let aws = AwsClients::load(config.aws_region.clone()).await?;
        let credentials = aws.resolve_credentials().await?;

        let agent = Client::new();
        let broker = Arc::new(
            AuthBroker::new(agent.clone())
                .with_aws_credentials((*credentials).clone())
                .with_aws_region(aws.region.clone()),
        );
        let registry_client = Arc::new(RegistryClient::new(agent, broker));

        Ok(RowdyDaemon {
            config,
            namespace: namespace.into(),
            registry_client,
            aws,
        })
    }

    pub(crate) fn controller(&self) -> rowdycontroller::FunctionController {
        rowdycontroller::FunctionController::new(
            self.aws.iam.clone(),
            self.aws.lambda.clone(),
            self.namespace.clone(),
            self.config.reconciler_retries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_default_config_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = RowdyConfig::load(&path).await.unwrap();
        assert_eq!(config.default_registry, "registry-1.docker.io");
    }
}
