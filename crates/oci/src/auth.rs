use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use aws_credential_types::Credentials;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use url::Url;

use crate::name::Authorization;

/// A parsed `WWW-Authenticate: <scheme> realm="...", service="...", scope="..."` header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Challenge {
    pub scheme: String,
    pub realm: String,
    pub service: String,
    pub scope: String,
}

impl Challenge {
    /// Parses the header value of a 401 `WWW-Authenticate` response. Only the `Bearer`
    /// and `Basic` schemes are understood; any other scheme, or a missing `realm`,
    /// `service`, or `scope` parameter, is an error.
    pub fn parse(header_value: &str) -> Result<Challenge> {
        let (scheme, rest) = header_value
            .split_once(' ')
            .ok_or_else(|| anyhow!("unparseable WWW-Authenticate header: {header_value}"))?;

        let params: HashMap<String, String> = rest
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().trim_matches('"').to_string()))
            .collect();

        let realm = params
            .get("realm")
            .cloned()
            .ok_or_else(|| anyhow!("WWW-Authenticate missing realm"))?;
        let service = params
            .get("service")
            .cloned()
            .ok_or_else(|| anyhow!("WWW-Authenticate missing service"))?;
        let scope = params
            .get("scope")
            .cloned()
            .ok_or_else(|| anyhow!("WWW-Authenticate missing scope"))?;

        Ok(Challenge {
            scheme: scheme.to_string(),
            realm,
            service,
            scope,
        })
    }
}

#[derive(Clone, Debug)]
struct CachedToken {
    authorization: Authorization,
    expires_at: Instant,
}

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Sits in front of every registry HTTP call. Caches `{scheme, realm, service, scope} ->
/// {authorization, expiresAt}` and coalesces concurrent refreshes for the same
/// fingerprint behind a per-broker mutex.
pub struct AuthBroker {
    agent: Client,
    cache: Mutex<HashMap<Challenge, CachedToken>>,
    aws_credentials: Option<Arc<Credentials>>,
    aws_region: String,
}

impl AuthBroker {
    pub fn new(agent: Client) -> AuthBroker {
        AuthBroker {
            agent,
            cache: Mutex::new(HashMap::new()),
            aws_credentials: None,
            aws_region: "us-east-1".to_string(),
        }
    }

    pub fn with_aws_credentials(mut self, credentials: Credentials) -> AuthBroker {
        self.aws_credentials = Some(Arc::new(credentials));
        self
    }

    pub fn with_aws_region(mut self, region: impl Into<String>) -> AuthBroker {
        self.aws_region = region.into();
        self
    }

    /// Resolves (from cache, or by fetching) the authorization to use for a challenge,
    /// refreshing only once per fingerprint even under concurrent callers.
    pub async fn resolve(&self, challenge: &Challenge) -> Result<Authorization> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(challenge) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.authorization.clone());
                }
            }
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(challenge) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.authorization.clone());
            }
        }

        let (authorization, ttl) = self.fetch_token(challenge).await?;
        cache.insert(
            challenge.clone(),
            CachedToken {
                authorization: authorization.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(authorization)
    }

    async fn fetch_token(&self, challenge: &Challenge) -> Result<(Authorization, Duration)> {
        let mut url = Url::parse(&challenge.realm)?;
        url.query_pairs_mut()
            .append_pair("service", &challenge.service)
            .append_pair("scope", &challenge.scope);

        let is_ecr_realm = challenge.service == "ecr.amazonaws.com";

        let response = if is_ecr_realm {
            let credentials = self
                .aws_credentials
                .as_ref()
                .ok_or_else(|| anyhow!("ECR realm challenge requires AWS credentials"))?;
            let signed = crate::sigv4::sign_get(&url, credentials, &self.aws_region, "ecr")?;
            self.agent.execute(signed).await?
        } else {
            self.agent.get(url.clone()).send().await?
        };

        if response.status() != StatusCode::OK {
            return Err(anyhow!(
                "failed to acquire token via {}: status {}",
                url,
                response.status()
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("token key missing from auth response"))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        let authorization = match challenge.scheme.as_str() {
            "Bearer" => Authorization::Bearer(token),
            "Basic" => Authorization::Basic(token),
            other => return Err(anyhow!("unsupported authentication scheme: {other}")),
        };

        Ok((authorization, expires_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header =
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.scheme, "Bearer");
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service, "registry.docker.io");
        assert_eq!(challenge.scope, "repository:library/nginx:pull");
    }

    #[test]
    fn fails_when_scope_missing() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#;
        assert!(Challenge::parse(header).is_err());
    }

    #[test]
    fn distinct_challenges_hash_independently() {
        let a = Challenge {
            scheme: "Bearer".into(),
            realm: "https://r".into(),
            service: "s".into(),
            scope: "pull".into(),
        };
        let b = Challenge {
            scheme: "Bearer".into(),
            realm: "https://r".into(),
            service: "s".into(),
            scope: "push".into(),
        };
        assert_ne!(a, b);
    }
}
