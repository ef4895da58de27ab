use anyhow::Result;
use bytes::Bytes;
use oci_spec::image::{
    Arch, Descriptor, ImageIndexBuilder, ImageManifest, ImageManifestBuilder, MediaType, Os,
};
use sha2::{Digest as Sha2Digest, Sha256};

use crate::collector::{CollectedManifest, PlatformManifest};
use crate::target::ScopedTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadItemType {
    Blob,
    Manifest,
    Index,
}

/// One unit of work for the upload executor: either a blob to copy byte-for-byte, or
/// a manifest/index body synthesized locally and uploaded from memory.
#[derive(Clone)]
pub struct UploadItem {
    pub kind: UploadItemType,
    pub digest: String,
    pub media_type: String,
    pub size: u64,
    pub from_url: Option<String>,
    pub to_url: String,
    /// Blobs only: the `/v2/<slug>/blobs/uploads/` session-initiation endpoint (§4.F
    /// step 2), distinct from `to_url`'s blob-digest URL used for the existence probe.
    pub upload_url: Option<String>,
    pub content: Option<Bytes>,
    pub overlay_annotation: Option<String>,
}

/// The three ordered groups produced for a collected manifest. All of `blobs` must
/// complete before any of `image_manifests`, which must complete before `index`.
pub struct TransferPlan {
    pub blobs: Vec<UploadItem>,
    pub image_manifests: Vec<UploadItem>,
    pub index: UploadItem,
    /// The synthesized image-manifest digest recorded for each platform, so the
    /// status aggregator can resolve `imageRef(platform)` without re-deriving it.
    pub platform_digests: Vec<(Os, Arch, String)>,
}

/// Plans a transfer: blob items (deduplicated by the target's content-addressed
/// semantics), one synthesized image-manifest item per platform, and exactly one
/// index/tag item referencing the synthesized per-platform digests.
pub fn plan(collected: &CollectedManifest, target: &dyn ScopedTarget) -> Result<TransferPlan> {
    let mut blobs = Vec::new();
    let mut image_manifests = Vec::new();
    let mut synthesized_descriptors = Vec::with_capacity(collected.manifests.len());
    let mut platform_digests = Vec::with_capacity(collected.manifests.len());

    for platform in &collected.manifests {
        blobs.push(blob_item(collected, platform, platform.manifest.config(), target));
        for layer in platform.manifest.layers() {
            blobs.push(blob_item(collected, platform, layer, target));
        }

        let (body, digest) = synthesize_manifest_body(&platform.manifest)?;
        let synthesized = Descriptor::new(
            platform.manifest.media_type().clone().unwrap_or(MediaType::ImageManifest),
            body.len() as i64,
            digest.clone(),
        );

        image_manifests.push(UploadItem {
            kind: UploadItemType::Manifest,
            digest: digest.clone(),
            media_type: media_type_string(platform.manifest.media_type().clone()),
            size: body.len() as u64,
            from_url: None,
            to_url: target.manifest_url(&digest),
            upload_url: None,
            content: Some(Bytes::from(body)),
            overlay_annotation: None,
        });

        let mut descriptor_with_platform = synthesized;
        descriptor_with_platform.set_platform(platform.descriptor.platform().clone());
        descriptor_with_platform.set_annotations(platform.descriptor.annotations().clone());
        synthesized_descriptors.push(descriptor_with_platform);

        if let (Some(os), Some(arch)) = (platform.os(), platform.architecture()) {
            platform_digests.push((os.clone(), arch.clone(), digest));
        }
    }

    let reference = collected
        .reference
        .tag
        .clone()
        .unwrap_or_else(|| format!("untagged-{}", short_digest(&collected.index_digest)));

    let index_body = ImageIndexBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageIndex)
        .manifests(synthesized_descriptors)
        .build()?;
    let serialized = serde_json::to_vec(&index_body)?;

    let index = UploadItem {
        kind: UploadItemType::Index,
        digest: reference.clone(),
        media_type: MediaType::ImageIndex.to_string(),
        size: serialized.len() as u64,
        from_url: None,
        to_url: target.manifest_url(&reference),
        upload_url: None,
        content: Some(Bytes::from(serialized)),
        overlay_annotation: None,
    };

    Ok(TransferPlan {
        blobs,
        image_manifests,
        index,
        platform_digests,
    })
}

fn blob_item(
    collected: &CollectedManifest,
    _platform: &PlatformManifest,
    descriptor: &Descriptor,
    target: &dyn ScopedTarget,
) -> UploadItem {
    let overlay_annotation = descriptor
        .annotations()
        .as_ref()
        .and_then(|a| a.get(rowdy_core::tags::OVERLAY_INDEX_URL_ANNOTATION))
        .cloned();
    // A grafted layer is annotated with the overlay's *manifest* URL (for the uploaded
    // manifest body), but must be fetched from the overlay registry's *blob* URL, so
    // this derives the source from `overlay_source` rather than the annotation itself.
    let source_reference = if overlay_annotation.is_some() {
        collected.overlay_source.as_ref().unwrap_or(&collected.reference)
    } else {
        &collected.reference
    };
    let from_url = format!(
        "https://{}/v2/{}/blobs/{}",
        source_reference.registry,
        source_reference.slug,
        descriptor.digest()
    );
    UploadItem {
        kind: UploadItemType::Blob,
        digest: descriptor.digest().clone(),
        media_type: descriptor.media_type().to_string(),
        size: descriptor.size() as u64,
        from_url: Some(from_url),
        to_url: target.blob_url(descriptor.digest()),
        upload_url: Some(target.upload_url()),
        content: None,
        overlay_annotation,
    }
}

fn synthesize_manifest_body(manifest: &ImageManifest) -> Result<(Vec<u8>, String)> {
    let rebuilt = ImageManifestBuilder::default()
        .schema_version(2u32)
        .media_type(manifest.media_type().clone().unwrap_or(MediaType::ImageManifest))
        .config(manifest.config().clone())
        .layers(manifest.layers().clone())
        .build()?;
    let body = serde_json::to_vec(&rebuilt)?;
    let digest = format!("sha256:{:x}", Sha256::digest(&body));
    Ok((body, digest))
}

fn media_type_string(media_type: Option<MediaType>) -> String {
    media_type.unwrap_or(MediaType::ImageManifest).to_string()
}

fn short_digest(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    hex.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_reference_uses_first_12_hex_chars() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(short_digest(&digest), "a".repeat(12));
    }
}
