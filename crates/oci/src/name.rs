use std::fmt;

use anyhow::{anyhow, Result};

/// Bearer or basic credential attached to a normalized reference by the auth broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Bearer(String),
    Basic(String),
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Bearer(token) => write!(f, "Bearer {token}"),
            Authorization::Basic(token) => write!(f, "Basic {token}"),
        }
    }
}

/// A normalized image reference: the output of splitting a raw user string into its
/// registry, namespace, name, and content pin.
///
/// `image()` and `manifest_url()` are derived, not independently assignable, so the
/// "image is a pure function of the other fields" invariant can't be broken by an
/// out-of-band mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub slug: String,
    pub digest: String,
    pub tag: Option<String>,
    pub authorization: Option<Authorization>,
}

impl ImageReference {
    pub const DEFAULT_NAMESPACE: &'static str = "library";
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Splits `raw` into registry/namespace/name/digest per the reference grammar:
    /// `[registry/[prefix/...]/]namespace/name(:tag|@sha256:hex)`.
    ///
    /// Split on `/`; with three or more segments the first is the registry, else
    /// `default_registry` is used. The remaining segments are reversed: the first is
    /// `name[:tag]` or `name@sha256:...`, the next is `namespace` (default `library`);
    /// anything further is prepended back onto the slug.
    pub fn normalize(raw: &str, default_registry: &str) -> Result<ImageReference> {
        let (path, digest_pin) = match raw.split_once('@') {
            Some((path, digest)) => (path.to_string(), Some(digest.to_string())),
            None => (raw.to_string(), None),
        };

        let mut segments: Vec<String> = path.split('/').map(|s| s.to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(anyhow!("invalid image reference: {raw}"));
        }

        let registry = if segments.len() >= 3 {
            segments.remove(0)
        } else {
            default_registry.to_string()
        };

        segments.reverse();
        let name_and_tag = segments
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("invalid image reference: {raw}"))?;
        let namespace_segment = segments.get(1).cloned();
        let mut slug_prefix: Vec<String> = segments.iter().skip(2).cloned().collect();
        slug_prefix.reverse();

        let (name, tag_from_colon) = match name_and_tag.split_once(':') {
            Some((name, tag)) => (name.to_string(), Some(tag.to_string())),
            None => (name_and_tag.clone(), None),
        };

        if name.is_empty() {
            return Err(anyhow!("invalid image reference: {raw}, name is empty"));
        }

        let namespace = namespace_segment.unwrap_or_else(|| Self::DEFAULT_NAMESPACE.to_string());

        let mut slug_parts = slug_prefix;
        slug_parts.push(namespace.clone());
        slug_parts.push(name.clone());
        let slug = slug_parts.join("/");

        let (tag, digest) = if let Some(digest) = digest_pin {
            if !digest.starts_with("sha256:") {
                return Err(anyhow!("unsupported digest algorithm in {raw}"));
            }
            (None, digest)
        } else {
            let tag = tag_from_colon.unwrap_or_else(|| Self::DEFAULT_TAG.to_string());
            (Some(tag.clone()), tag)
        };

        Ok(ImageReference {
            registry,
            namespace,
            name,
            slug,
            digest,
            tag,
            authorization: None,
        })
    }

    /// `<registry>/<slug>(:tag|@digest)`, the fully-qualified string form.
    pub fn image(&self) -> String {
        format!("{}/{}{}", self.registry, self.slug, self.suffix())
    }

    /// `https://<registry>/v2/<slug>/manifests/<digest>`.
    pub fn manifest_url(&self) -> String {
        format!(
            "https://{}/v2/{}/manifests/{}",
            self.registry, self.slug, self.digest
        )
    }

    fn suffix(&self) -> String {
        if self.tag.is_some() {
            format!(":{}", self.digest)
        } else {
            format!("@{}", self.digest)
        }
    }

    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = Some(authorization);
        self
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_short_form_to_default_registry_and_namespace() {
        let r = ImageReference::normalize("nginx", "registry-1.docker.io").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.namespace, "library");
        assert_eq!(r.name, "nginx");
        assert_eq!(r.slug, "library/nginx");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, "latest");
        assert_eq!(r.image(), "registry-1.docker.io/library/nginx:latest");
    }

    #[test]
    fn normalizes_namespace_and_tag() {
        let r = ImageReference::normalize("bitnami/redis:7.2", "registry-1.docker.io").unwrap();
        assert_eq!(r.namespace, "bitnami");
        assert_eq!(r.name, "redis");
        assert_eq!(r.slug, "bitnami/redis");
        assert_eq!(r.tag.as_deref(), Some("7.2"));
    }

    #[test]
    fn normalizes_explicit_registry_with_three_segments() {
        let r =
            ImageReference::normalize("ghcr.io/scaffoldly/demo:v1", "registry-1.docker.io")
                .unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.namespace, "scaffoldly");
        assert_eq!(r.name, "demo");
        assert_eq!(r.slug, "scaffoldly/demo");
    }

    #[test]
    fn normalizes_nested_namespace_prefix() {
        let r = ImageReference::normalize(
            "registry.example.com/a/b/c:latest",
            "registry-1.docker.io",
        )
        .unwrap();
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.namespace, "b");
        assert_eq!(r.name, "c");
        assert_eq!(r.slug, "a/b/c");
    }

    #[test]
    fn digest_pin_sets_tag_to_none() {
        let digest = "sha256:".to_string() + &"a".repeat(64);
        let raw = format!("library/nginx@{digest}");
        let r = ImageReference::normalize(&raw, "registry-1.docker.io").unwrap();
        assert!(r.tag.is_none());
        assert_eq!(r.digest, digest);
        assert_eq!(
            r.image(),
            format!("registry-1.docker.io/library/nginx@{digest}")
        );
    }

    #[test]
    fn manifest_url_uses_digest_field() {
        let r = ImageReference::normalize("nginx:1.27", "registry-1.docker.io").unwrap();
        assert_eq!(
            r.manifest_url(),
            "https://registry-1.docker.io/v2/library/nginx/manifests/1.27"
        );
    }

    #[test]
    fn fails_on_empty_name() {
        assert!(ImageReference::normalize("nginx:", "registry-1.docker.io").is_ok());
        assert!(ImageReference::normalize("", "registry-1.docker.io").is_err());
    }

    #[test]
    fn rejects_non_sha256_digest_algorithm() {
        let raw = "library/nginx@sha512:abcd";
        assert!(ImageReference::normalize(raw, "registry-1.docker.io").is_err());
    }
}
