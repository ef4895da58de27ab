use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::Stream;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rowdy_core::error::classify_http_status;

use crate::auth::{AuthBroker, Challenge};
use crate::name::Authorization;

pub const OCI_INDEX_AND_MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json",
);

/// Result of a blob existence probe: what the target registry already has.
pub struct BlobProbe {
    pub content_length: u64,
    pub digest: Option<String>,
}

/// Shared low-level HTTP plumbing for every registry call: sends a request,
/// transparently satisfies a 401 `WWW-Authenticate` challenge once via the
/// [`AuthBroker`], and retries the original request with the resolved credential.
pub struct RegistryClient {
    agent: Client,
    broker: Arc<AuthBroker>,
}

impl RegistryClient {
    pub fn new(agent: Client, broker: Arc<AuthBroker>) -> RegistryClient {
        RegistryClient { agent, broker }
    }

    pub fn agent(&self) -> &Client {
        &self.agent
    }

    /// Sends `req`. On a 401 with a parseable `WWW-Authenticate`, resolves the
    /// challenge through the broker and retries once with `Authorization` set.
    pub async fn call(&self, req: RequestBuilder) -> Result<Response> {
        let attempt = req.try_clone().ok_or_else(|| anyhow!("request is not clonable"))?;
        let response = attempt.send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(header) = response.headers().get("www-authenticate") else {
            return Ok(response);
        };
        let challenge = Challenge::parse(header.to_str()?)?;
        let authorization = self.broker.resolve(&challenge).await?;

        let retried = req;
        let retried = match &authorization {
            Authorization::Bearer(token) => retried.bearer_auth(token),
            Authorization::Basic(token) => retried.header("Authorization", format!("Basic {token}")),
        };
        Ok(retried.send().await?)
    }

    pub async fn get(&self, url: &str, accept: &str, authorization: Option<&Authorization>) -> Result<Response> {
        let mut req = self.agent.get(url).header("Accept", accept);
        if let Some(authorization) = authorization {
            req = req.header("Authorization", authorization.to_string());
        }
        let response = self.call(req).await?;
        if let Some(err) = classify_http_status(response.status().as_u16(), url) {
            return Err(err.into());
        }
        Ok(response)
    }

    pub async fn head(&self, url: &str, authorization: Option<&Authorization>) -> Result<Response> {
        let mut req = self.agent.head(url);
        if let Some(authorization) = authorization {
            req = req.header("Authorization", authorization.to_string());
        }
        self.call(req).await
    }

    pub async fn post_empty(
        &self,
        url: &str,
        content_type: &str,
        authorization: Option<&Authorization>,
    ) -> Result<Response> {
        let mut req = self.agent.post(url).header("Content-Type", content_type);
        if let Some(authorization) = authorization {
            req = req.header("Authorization", authorization.to_string());
        }
        let response = self.call(req).await?;
        if let Some(err) = classify_http_status(response.status().as_u16(), url) {
            return Err(err.into());
        }
        Ok(response)
    }

    pub async fn patch_stream(
        &self,
        url: &str,
        body: impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static,
        authorization: Option<&Authorization>,
    ) -> Result<Response> {
        let mut req = self
            .agent
            .patch(url)
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body));
        if let Some(authorization) = authorization {
            req = req.header("Authorization", authorization.to_string());
        }
        let response = req.send().await?;
        if let Some(err) = classify_http_status(response.status().as_u16(), url) {
            return Err(err.into());
        }
        Ok(response)
    }

    pub async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
        authorization: Option<&Authorization>,
    ) -> Result<Response> {
        let mut req = self
            .agent
            .put(url)
            .header("Content-Type", content_type)
            .body(body);
        if let Some(authorization) = authorization {
            req = req.header("Authorization", authorization.to_string());
        }
        let response = self.call(req).await?;
        if let Some(err) = classify_http_status(response.status().as_u16(), url) {
            return Err(err.into());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_once_after_satisfying_challenge() {
        let registry = MockServer::start().await;
        let auth_server = MockServer::start().await;

        let challenge = format!(
            r#"Bearer realm="{}/token",service="registry",scope="repository:ns/name:pull""#,
            auth_server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/v2/ns/name/manifests/latest"))
            .respond_with(ResponseTemplate::new(401).insert_header("www-authenticate", challenge.as_str()))
            .mount(&registry)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/ns/name/manifests/latest"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&registry)
            .await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "test-token"})))
            .mount(&auth_server)
            .await;

        let broker = Arc::new(AuthBroker::new(Client::new()));
        let client = RegistryClient::new(Client::new(), broker);
        let url = format!("{}/v2/ns/name/manifests/latest", registry.uri());
        let response = client.get(&url, "application/vnd.oci.image.manifest.v1+json", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
