use anyhow::Result;
use rowdyoci::collector::collect;
use rowdyoci::name::ImageReference;
use rowdyoci::planner::plan;
use rowdyoci::progress::{BoundTransferProgress, TransferProgress, TransferProgressContext};
use rowdyoci::status::TransferStatus;
use rowdyoci::target::{race_login, LocalTarget, TargetRegistry};
use rowdyoci::upload::execute_plan;

use crate::RowdyDaemon;

/// `PullImage(image, annotations?)` (§6): `layers_from` mirrors the
/// `run.rowdy.image.layers-from` annotation, `authorization` mirrors
/// `run.rowdy.image.auth` (carried through to the normalized reference so a
/// pre-obtained credential can skip the auth broker's challenge round-trip; `None`
/// lets the broker resolve one itself).
pub struct PullRequest {
    pub image: String,
    pub layers_from: Option<String>,
    pub authorization: Option<rowdyoci::name::Authorization>,
}

/// What `pullImage` returns per §7: the final image reference plus a code (200 or
/// 206) and the flattened non-success reasons, rather than throwing for a merely
/// partial transfer. `digest` and `tag` are split back out of `image_ref` for
/// `CreateContainerRequest`, which needs them as separate fields rather than
/// re-parsing the composed `host/slug@digest` string.
pub struct PullOutcome {
    pub image_ref: String,
    pub digest: String,
    pub tag: Option<String>,
    pub code: u16,
    pub reasons: Vec<String>,
}

/// Runs A through G end to end: normalize, collect (optionally grafting an
/// overlay), resolve the target registry, plan the upload, execute it, and
/// resolve the final reference for the requested platform.
pub async fn pull_image(daemon: &RowdyDaemon, request: PullRequest) -> Result<PullOutcome> {
    let mut reference = ImageReference::normalize(&request.image, &daemon.config.default_registry)?;
    if let Some(authorization) = request.authorization {
        reference = reference.with_authorization(authorization);
    }
    let overlay = request
        .layers_from
        .as_deref()
        .map(|raw| ImageReference::normalize(raw, &daemon.config.default_registry))
        .transpose()?;

    let concurrency = daemon.config.concurrency();
    let collected = collect(&daemon.registry_client, &reference, overlay.as_ref(), concurrency).await?;

    let target = resolve_target(daemon).await?;
    let scoped = target.with_slug(&collected.reference.slug).await?;
    let authorization = scoped.authorization().clone();

    let transfer_plan = plan(&collected, scoped.as_ref())?;

    let (progress_context, _subscription) = TransferProgressContext::create();
    let mut progress = TransferProgress::new();
    for item in transfer_plan
        .blobs
        .iter()
        .chain(transfer_plan.image_manifests.iter())
        .chain(std::iter::once(&transfer_plan.index))
    {
        progress.add_item(&item.digest, item.size);
    }
    let bound_progress = BoundTransferProgress::new(progress_context, progress);

    let results = execute_plan(&daemon.registry_client, &transfer_plan, &authorization, concurrency, &bound_progress)
        .await?;

    let mut status = TransferStatus::new();
    for (digest, result) in results {
        status.record(digest, result);
    }

    let image_ref = status.image_ref(&transfer_plan, &collected.reference.slug, target.host(), None, None)?;

    Ok(PullOutcome {
        image_ref,
        digest: collected.reference.digest.clone(),
        tag: collected.reference.tag.clone(),
        code: status.code(),
        reasons: status.reasons(),
    })
}

/// Races the ECR implementation of `TargetRegistry` against the always-pending
/// `LocalTarget` (§4.D). With only one implementation that can actually produce a
/// value, this exists chiefly to preserve the race shape for a future second
/// target; `AWS_ECR_REGISTRY` (`aws_ecr_registry_override`) short-circuits the
/// `STS:GetCallerIdentity` host inference when set.
async fn resolve_target(daemon: &RowdyDaemon) -> Result<Box<dyn TargetRegistry>> {
    let credentials = daemon.aws.resolve_credentials().await?;
    let ecr = rowdyaws::ecr::EcrTarget::discover(
        &daemon.aws.sts,
        daemon.aws.ecr.clone(),
        daemon.registry_client.agent().clone(),
        credentials,
        daemon.aws.region.clone(),
        daemon.config.aws_ecr_registry_override.clone(),
    )
    .await?;

    let candidates: Vec<Box<dyn TargetRegistry>> = vec![Box::new(ecr), Box::new(LocalTarget)];
    let (_authorization, target) = race_login(candidates).await?;
    Ok(target)
}
