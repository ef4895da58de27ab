use anyhow::{anyhow, Result};
use oci_spec::image::{Arch, Os};

use crate::planner::TransferPlan;
use crate::upload::UploadResult;

/// Aggregates upload results as they complete: `code` flips to 206 the moment any
/// result fails, and never flips back.
#[derive(Clone, Debug, Default)]
pub struct TransferStatus {
    log: Vec<(String, UploadResult)>,
}

impl TransferStatus {
    pub fn new() -> TransferStatus {
        TransferStatus { log: Vec::new() }
    }

    pub fn record(&mut self, digest: String, result: UploadResult) {
        self.log.push((digest, result));
    }

    pub fn code(&self) -> u16 {
        if self.log.iter().any(|(_, r)| r.failed()) {
            206
        } else {
            200
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.log
            .iter()
            .flat_map(|(_, r)| r.reasons.iter().cloned())
            .collect()
    }

    /// Resolves the final `<targetRegistry>/<ns>/<name>@<digest>` reference for the
    /// requested platform by matching its (os, architecture) against the synthesized
    /// per-platform manifest digests recorded in the plan. Default platform is
    /// `linux/amd64`.
    pub fn image_ref(
        &self,
        plan: &TransferPlan,
        slug: &str,
        target_registry: &str,
        os: Option<Os>,
        arch: Option<Arch>,
    ) -> Result<String> {
        let os = os.unwrap_or(Os::Linux);
        let arch = arch.unwrap_or(Arch::Amd64);

        let digest = plan
            .platform_digests
            .iter()
            .find(|(p_os, p_arch, _)| *p_os == os && *p_arch == arch)
            .map(|(_, _, digest)| digest.clone())
            .ok_or_else(|| anyhow!("Unable to find image for platform"))?;

        Ok(format!("{target_registry}/{slug}@{digest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{UploadItem, UploadItemType};

    fn empty_plan(platform_digests: Vec<(Os, Arch, String)>) -> TransferPlan {
        TransferPlan {
            blobs: vec![],
            image_manifests: vec![],
            index: UploadItem {
                kind: UploadItemType::Index,
                digest: "latest".to_string(),
                media_type: "application/vnd.oci.image.index.v1+json".to_string(),
                size: 0,
                from_url: None,
                to_url: "https://example.com/v2/ns/name/manifests/latest".to_string(),
                upload_url: None,
                content: None,
                overlay_annotation: None,
            },
            platform_digests,
        }
    }

    #[test]
    fn resolves_image_ref_for_default_platform() {
        let plan = empty_plan(vec![(Os::Linux, Arch::Amd64, "sha256:abc".to_string())]);
        let status = TransferStatus::new();
        let image_ref = status
            .image_ref(&plan, "ns/name", "registry.example.com", None, None)
            .unwrap();
        assert_eq!(image_ref, "registry.example.com/ns/name@sha256:abc");
    }

    #[test]
    fn fails_when_platform_absent() {
        let plan = empty_plan(vec![(Os::Linux, Arch::Amd64, "sha256:abc".to_string())]);
        let status = TransferStatus::new();
        let result = status.image_ref(&plan, "ns/name", "registry.example.com", Some(Os::Linux), Some(Arch::ARM64));
        assert!(result.is_err());
    }

    #[test]
    fn code_is_200_when_nothing_failed() {
        let mut status = TransferStatus::new();
        status.record(
            "sha256:aaa".to_string(),
            UploadResult {
                statuses: vec![200],
                reasons: vec![],
                verified: true,
            },
        );
        assert_eq!(status.code(), 200);
    }

    #[test]
    fn code_is_206_once_any_result_fails() {
        let mut status = TransferStatus::new();
        status.record(
            "sha256:aaa".to_string(),
            UploadResult {
                statuses: vec![200],
                reasons: vec![],
                verified: true,
            },
        );
        status.record(
            "sha256:bbb".to_string(),
            UploadResult {
                statuses: vec![500],
                reasons: vec!["server error".to_string()],
                verified: false,
            },
        );
        assert_eq!(status.code(), 206);
        assert_eq!(status.reasons(), vec!["server error".to_string()]);
    }
}
