use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_ecr::Client as EcrClient;
use aws_sdk_sts::Client as StsClient;
use reqwest::{Client, StatusCode};
use rowdyoci::auth::{AuthBroker, Challenge};
use rowdyoci::client::RegistryClient;
use rowdyoci::name::Authorization;
use rowdyoci::target::{ScopedTarget, TargetRegistry};

/// The AWS ECR implementation of `TargetRegistry` (§4.D). `login()` GETs the
/// registry's bare `/v2/` endpoint, which 401s with an ECR-flavored
/// `WWW-Authenticate` challenge; the registry auth broker's SigV4 degenerate case
/// (§4.B) resolves it using ambient AWS credentials.
pub struct EcrTarget {
    ecr: EcrClient,
    agent: Client,
    broker: Arc<AuthBroker>,
    host: String,
}

impl EcrTarget {
    /// Resolves the account-scoped ECR registry host (`<account-id>.dkr.ecr.<region>.amazonaws.com`)
    /// via `STS:GetCallerIdentity`, unless `host_override` (mirroring `AWS_ECR_REGISTRY`) is set.
    pub async fn discover(
        sts: &StsClient,
        ecr: EcrClient,
        agent: Client,
        credentials: Arc<Credentials>,
        region: String,
        host_override: Option<String>,
    ) -> Result<EcrTarget> {
        let host = match host_override {
            Some(host) => host,
            None => {
                let identity = sts
                    .get_caller_identity()
                    .send()
                    .await
                    .map_err(|e| anyhow!("GetCallerIdentity failed: {e}"))?;
                let account_id = identity
                    .account()
                    .ok_or_else(|| anyhow!("GetCallerIdentity response missing Account"))?;
                format!("{account_id}.dkr.ecr.{region}.amazonaws.com")
            }
        };

        let broker = Arc::new(
            AuthBroker::new(agent.clone())
                .with_aws_credentials((*credentials).clone())
                .with_aws_region(region),
        );

        Ok(EcrTarget { ecr, agent, broker, host })
    }
}

#[async_trait]
impl TargetRegistry for EcrTarget {
    async fn login(&self) -> Result<Authorization> {
        let url = format!("https://{}/v2/", self.host);
        let response = self.agent.get(&url).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Err(anyhow!(
                "expected a 401 challenge from the ECR v2 endpoint, got {}",
                response.status()
            ));
        }

        let header = response
            .headers()
            .get("www-authenticate")
            .ok_or_else(|| anyhow!("ECR v2 endpoint 401 missing WWW-Authenticate"))?;
        let challenge = Challenge::parse(header.to_str()?)?;
        self.broker.resolve(&challenge).await
    }

    async fn with_slug(&self, slug: &str) -> Result<Box<dyn ScopedTarget>> {
        let authorization = self.login().await?;
        ensure_repository(&self.ecr, slug).await?;
        let registry_client = RegistryClient::new(self.agent.clone(), self.broker.clone());
        Ok(Box::new(EcrScopedTarget {
            host: self.host.clone(),
            slug: slug.to_string(),
            authorization,
            _client: registry_client,
        }))
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// `DescribeRepositories` then `CreateRepository` on not-found; idempotent.
async fn ensure_repository(ecr: &EcrClient, slug: &str) -> Result<()> {
    let described = ecr.describe_repositories().repository_names(slug).send().await;
    match described {
        Ok(_) => Ok(()),
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_repository_not_found_exception())
            {
                ecr.create_repository()
                    .repository_name(slug)
                    .send()
                    .await
                    .map_err(|e| anyhow!("CreateRepository failed: {e}"))?;
                Ok(())
            } else {
                Err(anyhow!("DescribeRepositories failed: {err}"))
            }
        }
    }
}

struct EcrScopedTarget {
    host: String,
    slug: String,
    authorization: Authorization,
    _client: RegistryClient,
}

#[async_trait]
impl ScopedTarget for EcrScopedTarget {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecr_scoped_target_urls_follow_distribution_shape() {
        let target = EcrScopedTarget {
            host: "123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            slug: "library/ubuntu".to_string(),
            authorization: Authorization::Bearer("token".to_string()),
            _client: RegistryClient::new(Client::new(), Arc::new(AuthBroker::new(Client::new()))),
        };
        assert_eq!(
            target.blob_url("sha256:abc"),
            "https://123456789012.dkr.ecr.us-east-1.amazonaws.com/v2/library/ubuntu/blobs/sha256:abc"
        );
        assert_eq!(
            target.manifest_url("noble-20251001"),
            "https://123456789012.dkr.ecr.us-east-1.amazonaws.com/v2/library/ubuntu/manifests/noble-20251001"
        );
    }
}
