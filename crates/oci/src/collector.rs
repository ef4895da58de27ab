use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::try_join_all;
use oci_spec::image::{Arch, Descriptor, ImageIndex, ImageIndexBuilder, ImageManifest, MediaType, Os, ToDockerV2S2};
use rowdy_core::tags::{ATTESTATION_MANIFEST_ANNOTATION, ATTESTATION_MANIFEST_ANNOTATION_VALUE, OVERLAY_INDEX_URL_ANNOTATION};

use crate::client::RegistryClient;
use crate::name::ImageReference;

/// The unified `Accept` header used when fetching a manifest URL that may resolve to
/// either an index/manifest-list or a single image manifest.
pub fn index_and_manifest_accept() -> Result<String> {
    Ok(format!(
        "{}, {}, {}, {}",
        MediaType::ImageManifest.to_docker_v2s2()?,
        MediaType::ImageManifest,
        MediaType::ImageIndex,
        MediaType::ImageIndex.to_docker_v2s2()?,
    ))
}

/// One platform's image manifest alongside the index descriptor that pointed to it.
#[derive(Clone, Debug)]
pub struct PlatformManifest {
    pub descriptor: Descriptor,
    pub manifest: ImageManifest,
}

impl PlatformManifest {
    pub fn os(&self) -> Option<&Os> {
        self.descriptor.platform().as_ref().map(|p| p.os())
    }

    pub fn architecture(&self) -> Option<&Arch> {
        self.descriptor.platform().as_ref().map(|p| p.architecture())
    }
}

/// The result of collecting a (possibly multi-platform) image reference: the parsed
/// index plus each kept platform manifest, with attestation manifests and
/// `unknown`-architecture entries already filtered out.
#[derive(Clone, Debug)]
pub struct CollectedManifest {
    pub reference: ImageReference,
    pub index: ImageIndex,
    pub index_digest: String,
    pub manifests: Vec<PlatformManifest>,
    pub accept: String,
    /// The overlay reference, when `layersFrom` was supplied. Grafted layer blobs are
    /// annotated with `run.rowdy.index.url` (the overlay's manifest URL, for the final
    /// uploaded manifest) but must be *fetched* from the overlay registry's blob URL,
    /// which this field carries since the annotation itself ends up in the uploaded
    /// manifest body and can't double as transfer-planning metadata.
    pub overlay_source: Option<ImageReference>,
}

fn is_attestation(descriptor: &Descriptor) -> bool {
    descriptor
        .annotations()
        .as_ref()
        .and_then(|a| a.get(ATTESTATION_MANIFEST_ANNOTATION))
        .is_some_and(|v| v == ATTESTATION_MANIFEST_ANNOTATION_VALUE)
}

fn is_unknown_platform(descriptor: &Descriptor) -> bool {
    descriptor
        .platform()
        .as_ref()
        .is_some_and(|p| p.os().to_string() == "unknown" || p.architecture().to_string() == "unknown")
}

/// Collects a normalized image reference into a `CollectedManifest`, optionally
/// grafting in layers from an overlay ("layersFrom") reference that is collected
/// recursively first.
pub async fn collect(
    client: &Arc<RegistryClient>,
    reference: &ImageReference,
    overlay: Option<&ImageReference>,
    concurrency: usize,
) -> Result<CollectedManifest> {
    let accept = index_and_manifest_accept()?;

    let overlay_collected = match overlay {
        Some(overlay_ref) => Some(Box::pin(collect(client, overlay_ref, None, concurrency)).await?),
        None => None,
    };

    let (index, index_digest) = fetch_index(client, reference, &accept).await?;

    let kept: Vec<Descriptor> = index
        .manifests()
        .iter()
        .filter(|d| !is_attestation(d))
        .filter(|d| !is_unknown_platform(d))
        .cloned()
        .collect();

    let manifests = fetch_manifests_concurrently(client, reference, kept, &accept, concurrency).await?;

    let manifests = if let Some(overlay_collected) = overlay_collected {
        graft_overlay(manifests, &overlay_collected, overlay.unwrap())
    } else {
        manifests
    };

    Ok(CollectedManifest {
        reference: reference.clone(),
        index,
        index_digest,
        manifests,
        accept,
        overlay_source: overlay.cloned(),
    })
}

async fn fetch_index(
    client: &Arc<RegistryClient>,
    reference: &ImageReference,
    accept: &str,
) -> Result<(ImageIndex, String)> {
    let response = client
        .get(&reference.manifest_url(), accept, reference.authorization.as_ref())
        .await?;

    let digest = response
        .headers()
        .get("docker-content-digest")
        .ok_or_else(|| anyhow!("manifest response missing docker-content-digest header"))?
        .to_str()?
        .to_string();

    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or_default().to_string())
        .unwrap_or_default();

    let body = response.bytes().await?;

    if content_type.contains("manifest.v2+json") || content_type.contains("image.manifest.v1+json") {
        // The registry returned a single-platform manifest directly; wrap it as a
        // one-entry index so downstream planning always deals with the index shape.
        let manifest: ImageManifest = serde_json::from_slice(&body)?;
        if manifest.schema_version() != 2 {
            return Err(anyhow!("unsupported manifest schemaVersion"));
        }
        let descriptor = Descriptor::new(manifest.media_type().clone().unwrap_or(MediaType::ImageManifest), body.len() as i64, digest.clone());
        let index = ImageIndexBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageIndex)
            .manifests(vec![descriptor])
            .build()
            .map_err(|e| anyhow!("failed to synthesize index: {e}"))?;
        return Ok((index, digest));
    }

    let index: ImageIndex = serde_json::from_slice(&body)?;
    if index.schema_version() != 2 {
        return Err(anyhow!("unsupported index schemaVersion"));
    }
    Ok((index, digest))
}

async fn fetch_manifests_concurrently(
    client: &Arc<RegistryClient>,
    reference: &ImageReference,
    descriptors: Vec<Descriptor>,
    accept: &str,
    concurrency: usize,
) -> Result<Vec<PlatformManifest>> {
    let mut results = Vec::with_capacity(descriptors.len());
    for chunk in descriptors.chunks(concurrency.max(1)) {
        let futures = chunk.iter().map(|descriptor| {
            let client = Arc::clone(client);
            let reference = reference.clone();
            let accept = accept.to_string();
            let descriptor = descriptor.clone();
            async move {
                let url = format!(
                    "https://{}/v2/{}/manifests/{}",
                    reference.registry, reference.slug, descriptor.digest()
                );
                let response = client.get(&url, &accept, reference.authorization.as_ref()).await?;
                let body = response.bytes().await?;
                let manifest: ImageManifest = serde_json::from_slice(&body)?;
                if manifest.schema_version() != 2 {
                    return Err(anyhow!("unsupported image manifest schemaVersion"));
                }
                Ok::<_, anyhow::Error>(PlatformManifest { descriptor, manifest })
            }
        });
        results.extend(try_join_all(futures).await?);
    }
    Ok(results)
}

fn graft_overlay(
    primary: Vec<PlatformManifest>,
    overlay: &CollectedManifest,
    overlay_reference: &ImageReference,
) -> Vec<PlatformManifest> {
    primary
        .into_iter()
        .map(|mut entry| {
            let matching = overlay.manifests.iter().find(|candidate| {
                candidate.os() == entry.os() && candidate.architecture() == entry.architecture()
            });
            if let Some(overlay_manifest) = matching {
                let mut layers = entry.manifest.layers().clone();
                for layer in overlay_manifest.manifest.layers() {
                    let mut grafted = layer.clone();
                    let mut annotations = grafted.annotations().clone().unwrap_or_default();
                    annotations.insert(
                        OVERLAY_INDEX_URL_ANNOTATION.to_string(),
                        overlay_reference.manifest_url(),
                    );
                    grafted.set_annotations(Some(annotations));
                    layers.push(grafted);
                }
                entry.manifest.set_layers(layers);
            }
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attestation_detection_matches_annotation() {
        let mut annotations = std::collections::HashMap::new();
        annotations.insert(
            ATTESTATION_MANIFEST_ANNOTATION.to_string(),
            ATTESTATION_MANIFEST_ANNOTATION_VALUE.to_string(),
        );
        let descriptor = Descriptor::new(MediaType::ImageManifest, 10, "sha256:abc".to_string())
            .annotations(annotations)
            .clone();
        assert!(is_attestation(&descriptor));
    }

    #[test]
    fn non_attestation_descriptor_is_kept() {
        let descriptor = Descriptor::new(MediaType::ImageManifest, 10, "sha256:abc".to_string());
        assert!(!is_attestation(&descriptor));
    }
}
