use std::time::SystemTime;

use anyhow::{anyhow, Result};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use reqwest::{Client, Request, Url};

/// Signs a GET request with SigV4 using ambient AWS credentials, for the AWS ECR
/// realm degenerate case of the registry auth broker: the realm endpoint itself is
/// a signed AWS API call rather than an anonymous token endpoint.
pub fn sign_get(url: &Url, credentials: &Credentials, region: &str, service: &str) -> Result<Request> {
    let identity = credentials.clone().into();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| anyhow!("failed to build SigV4 signing params: {e}"))?
        .into();

    let signable_request = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::empty(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| anyhow!("failed to build signable request: {e}"))?;

    let (signing_instructions, _signature) = sign(signable_request, &signing_params)
        .map_err(|e| anyhow!("failed to sign request: {e}"))?
        .into_parts();

    let mut builder = Client::new().get(url.clone());
    for (name, value) in signing_instructions.headers() {
        builder = builder.header(name, value);
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build signed request: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_without_error() {
        let credentials = Credentials::new("AKIA_TEST", "secret", None, None, "test");
        let url = Url::parse("https://api.ecr.us-east-1.amazonaws.com/").unwrap();
        let request = sign_get(&url, &credentials, "us-east-1", "ecr");
        assert!(request.is_ok());
    }
}
