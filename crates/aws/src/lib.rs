pub mod alias;
pub mod ecr;
pub mod function;
pub mod role;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;

/// The set of AWS SDK clients every reconciler in this crate needs, built once
/// from the ambient credential chain (`aws-config`) at daemon startup.
#[derive(Clone)]
pub struct AwsClients {
    pub iam: aws_sdk_iam::Client,
    pub lambda: aws_sdk_lambda::Client,
    pub ecr: aws_sdk_ecr::Client,
    pub sts: aws_sdk_sts::Client,
    pub region: String,
}

impl AwsClients {
    /// Loads the default credential/region chain (honoring `AWS_REGION`,
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` per §6)
    /// and builds every client this crate needs from it.
    pub async fn load(region_override: Option<String>) -> Result<AwsClients> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &region_override {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .or(region_override)
            .ok_or_else(|| anyhow!("no AWS region resolved; set AWS_REGION or configure one"))?;

        Ok(AwsClients {
            iam: aws_sdk_iam::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
            ecr: aws_sdk_ecr::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            region,
        })
    }

    /// Resolves a bare `aws-credential-types::Credentials` value from the same chain,
    /// for the SigV4-signed ECR realm flow the registry auth broker degenerates into
    /// (§4.B). The SDK clients above carry their own internal credential providers;
    /// this is the one place the raw credential is needed outside an SDK client call.
    pub async fn resolve_credentials(&self) -> Result<Arc<Credentials>> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .load()
            .await;
        let provider = config
            .credentials_provider()
            .ok_or_else(|| anyhow!("no AWS credentials provider resolved"))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| anyhow!("failed to resolve AWS credentials: {e}"))?;
        Ok(Arc::new(credentials))
    }
}
