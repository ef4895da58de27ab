use anyhow::Result;
use async_trait::async_trait;

use crate::name::Authorization;

/// The target side of a transfer: a registry host plus, once `with_slug` has been
/// called, a repository within it guaranteed to exist.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Authenticates against the registry host, yielding the credential to attach to
    /// every subsequent request.
    async fn login(&self) -> Result<Authorization>;

    /// Ensures the repository named by `slug` exists in this registry (idempotent),
    /// returning a handle scoped to it.
    async fn with_slug(&self, slug: &str) -> Result<Box<dyn ScopedTarget>>;

    fn host(&self) -> &str;
}

/// A `TargetRegistry` scoped to one repository slug.
#[async_trait]
pub trait ScopedTarget: Send + Sync {
    fn slug(&self) -> &str;
    fn authorization(&self) -> &Authorization;
    fn host(&self) -> &str;

    fn blob_url(&self, digest: &str) -> String {
        format!("https://{}/v2/{}/blobs/{}", self.host(), self.slug(), digest)
    }

    fn upload_url(&self) -> String {
        format!("https://{}/v2/{}/blobs/uploads/", self.host(), self.slug())
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!("https://{}/v2/{}/manifests/{}", self.host(), self.slug(), reference)
    }
}

/// Never produces a value: the degenerate "no remote target configured" case. Exists
/// so the race between target implementations has something to race against even
/// when only one is actually reachable.
pub struct LocalTarget;

#[async_trait]
impl TargetRegistry for LocalTarget {
    async fn login(&self) -> Result<Authorization> {
        std::future::pending().await
    }

    async fn with_slug(&self, _slug: &str) -> Result<Box<dyn ScopedTarget>> {
        std::future::pending().await
    }

    fn host(&self) -> &str {
        "local"
    }
}

/// Races every candidate `TargetRegistry`'s `login()`; the first to succeed wins and
/// the rest are dropped (cancelling their in-flight work).
pub async fn race_login(candidates: Vec<Box<dyn TargetRegistry>>) -> Result<(Authorization, Box<dyn TargetRegistry>)> {
    use futures::future::select_ok;

    let futures = candidates
        .into_iter()
        .map(|candidate| {
            Box::pin(async move {
                let authorization = candidate.login().await?;
                Ok::<_, anyhow::Error>((authorization, candidate))
            })
        })
        .collect::<Vec<_>>();

    let (result, _remaining) = select_ok(futures).await?;
    Ok(result)
}
