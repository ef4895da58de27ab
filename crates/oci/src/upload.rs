use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use rowdy_core::error::{classify_http_status, RowdyError};

use crate::client::RegistryClient;
use crate::name::Authorization;
use crate::planner::{TransferPlan, UploadItem, UploadItemType};
use crate::progress::BoundTransferProgress;
use crate::retry::{retry_transient, RetryOutcome};

/// The observed outcome of executing one upload item: every HTTP status seen along
/// the way, a reason per non-2xx response, and whether the item's content was
/// verified to already be present (the existence-probe short circuit).
#[derive(Clone, Debug, Default)]
pub struct UploadResult {
    pub statuses: Vec<u16>,
    pub reasons: Vec<String>,
    pub verified: bool,
}

impl UploadResult {
    pub fn failed(&self) -> bool {
        self.statuses.iter().any(|s| *s >= 400)
    }
}

/// Maps an HTTP-call failure to a `RetryOutcome`: the client wrappers classify a 5xx
/// (or other transient condition) into `RowdyError::TransientHttp` before returning
/// it, so that case must keep retrying rather than abort on the first attempt; any
/// other error (a transport failure, or a non-retryable `RowdyError` such as
/// `AuthFatal`) is fatal.
fn classify_retry_error(err: anyhow::Error) -> RetryOutcome {
    match err.downcast::<RowdyError>() {
        Ok(rowdy_err) => RetryOutcome::from_rowdy_error(rowdy_err),
        Err(other) => RetryOutcome::fatal(other),
    }
}

/// Executes an entire transfer plan: all blobs concurrently (bounded by
/// `concurrency`), then all image manifests concurrently, then the index/tag item,
/// honoring the ordering guarantee between the three groups.
pub async fn execute_plan(
    client: &Arc<RegistryClient>,
    plan: &TransferPlan,
    authorization: &Authorization,
    concurrency: usize,
    progress: &BoundTransferProgress,
) -> Result<Vec<(String, UploadResult)>> {
    let mut results = Vec::new();

    results.extend(
        execute_group(client, &plan.blobs, authorization, concurrency, progress).await,
    );
    results.extend(
        execute_group(client, &plan.image_manifests, authorization, concurrency, progress).await,
    );
    let index_result = execute_item(client, &plan.index, authorization, progress).await;
    results.push((plan.index.digest.clone(), index_result));

    Ok(results)
}

async fn execute_group(
    client: &Arc<RegistryClient>,
    items: &[UploadItem],
    authorization: &Authorization,
    concurrency: usize,
    progress: &BoundTransferProgress,
) -> Vec<(String, UploadResult)> {
    stream::iter(items.iter().cloned())
        .map(|item| {
            let client = Arc::clone(client);
            let authorization = authorization.clone();
            let progress = progress.clone();
            async move {
                let digest = item.digest.clone();
                let result = execute_item(&client, &item, &authorization, &progress).await;
                (digest, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

async fn execute_item(
    client: &Arc<RegistryClient>,
    item: &UploadItem,
    authorization: &Authorization,
    progress: &BoundTransferProgress,
) -> UploadResult {
    let mut result = UploadResult::default();

    if item.kind == UploadItemType::Blob {
        match probe_existence(client, item, authorization).await {
            Ok(Some(status)) => {
                result.statuses.push(status);
                result.verified = true;
                progress.update(|p| p.item_complete(&item.digest)).await;
                return result;
            }
            Ok(None) => {}
            Err(err) => {
                result.statuses.push(0);
                result.reasons.push(err.to_string());
                return result;
            }
        }
    }

    let outcome = if item.kind == UploadItemType::Blob {
        upload_blob(client, item, authorization, &mut result, progress).await
    } else {
        upload_manifest(client, item, authorization, &mut result).await
    };

    if let Err(err) = outcome {
        result.reasons.push(err.to_string());
    } else {
        progress.update(|p| p.item_complete(&item.digest)).await;
    }

    result
}

/// Step 1: HEAD the target URL. `Some(200)` means the blob is already present with a
/// matching size and digest and upload can be skipped entirely; `None` means proceed
/// to upload; any other observed status is an error.
async fn probe_existence(
    client: &Arc<RegistryClient>,
    item: &UploadItem,
    authorization: &Authorization,
) -> Result<Option<u16>> {
    let response = retry_transient(|| async {
        client
            .head(&item.to_url, Some(authorization))
            .await
            .map_err(classify_retry_error)
    })
    .await?;

    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        StatusCode::OK => {
            let content_length = response
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let digest_header = response
                .headers()
                .get("docker-content-digest")
                .and_then(|v| v.to_str().ok());
            if content_length == Some(item.size) && digest_header == Some(item.digest.as_str()) {
                Ok(Some(200))
            } else {
                Ok(None)
            }
        }
        other => Err(anyhow!("unexpected status {other} probing blob existence")),
    }
}

async fn upload_blob(
    client: &Arc<RegistryClient>,
    item: &UploadItem,
    authorization: &Authorization,
    result: &mut UploadResult,
    progress: &BoundTransferProgress,
) -> Result<()> {
    let upload_url = item
        .upload_url
        .as_deref()
        .ok_or_else(|| anyhow!("blob item missing upload initiation URL"))?;
    let initiate = retry_transient(|| async {
        client
            .post_empty(upload_url, &item.media_type, Some(authorization))
            .await
            .map_err(classify_retry_error)
    })
    .await?;
    result.statuses.push(initiate.status().as_u16());

    let session_url = initiate
        .headers()
        .get("location")
        .ok_or_else(|| anyhow!("upload initiation did not yield a Location header"))?
        .to_str()?
        .to_string();

    let from_url = item
        .from_url
        .clone()
        .ok_or_else(|| anyhow!("blob item missing source URL"))?;

    let body = retry_transient(|| {
        let client = Arc::clone(client);
        let from_url = from_url.clone();
        let media_type = item.media_type.clone();
        async move {
            client
                .get(&from_url, &media_type, None)
                .await
                .map_err(classify_retry_error)
        }
    })
    .await?;
    result.statuses.push(body.status().as_u16());

    let total = item.size;
    let digest = item.digest.clone();
    progress.update(|p| p.receiving(&digest, 0, total)).await;

    let bytes = body.bytes().await?;
    progress.update(|p| p.receiving(&digest, bytes.len() as u64, total)).await;

    let patch_response = retry_transient(|| {
        let client = Arc::clone(client);
        let session_url = session_url.clone();
        let bytes = bytes.clone();
        async move {
            let stream = stream::once(async move { Ok::<Bytes, std::io::Error>(bytes) });
            client
                .patch_stream(&session_url, stream, Some(authorization))
                .await
                .map_err(classify_retry_error)
        }
    })
    .await?;
    result.statuses.push(patch_response.status().as_u16());
    progress.update(|p| p.sending(&digest, total)).await;

    let patch_location = patch_response
        .headers()
        .get("location")
        .map(|v| v.to_str().map(|s| s.to_string()))
        .transpose()?
        .unwrap_or(session_url);

    let finalize_url = format!(
        "{}{}digest={}",
        patch_location,
        if patch_location.contains('?') { "&" } else { "?" },
        item.digest
    );
    let finalize = retry_transient(|| async {
        client
            .put_bytes(&finalize_url, &item.media_type, Bytes::new(), Some(authorization))
            .await
            .map_err(classify_retry_error)
    })
    .await?;
    result.statuses.push(finalize.status().as_u16());

    if let Some(err) = classify_http_status(finalize.status().as_u16(), &finalize_url) {
        return Err(err.into());
    }
    Ok(())
}

async fn upload_manifest(
    client: &Arc<RegistryClient>,
    item: &UploadItem,
    authorization: &Authorization,
    result: &mut UploadResult,
) -> Result<()> {
    let content = item
        .content
        .clone()
        .ok_or_else(|| anyhow!("manifest/index item missing synthesized body"))?;

    let response = retry_transient(|| {
        let client = Arc::clone(client);
        let content = content.clone();
        async move {
            client
                .put_bytes(&item.to_url, &item.media_type, content, Some(authorization))
                .await
                .map_err(classify_retry_error)
        }
    })
    .await?;
    result.statuses.push(response.status().as_u16());
    Ok(())
}

/// Cadence at which the aggregate transfer progress summary is emitted while active.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
