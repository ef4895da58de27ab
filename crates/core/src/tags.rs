//! Sanitization rules and namespacing conventions shared by the environment-variable
//! merge, IAM/Lambda tagging, and overlay annotation logic.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());
static ENV_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{Z}\p{N}_.:/=+\-@]*$").unwrap());
static TAG_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?!aws:)[A-Za-z0-9 _.:\-=+@]{1,128}$").unwrap());
static TAG_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9 _.:\-=+@]{0,256}$").unwrap());

/// Tag/label key every managed resource carries, paired with `managed_by_tag`'s value.
pub const MANAGED_BY_TAG_KEY: &str = "managed-by";

/// `managed-by` tag value applied to every managed cloud resource.
pub fn managed_by_tag(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Tag/label key carrying the caller's user agent.
pub const USER_AGENT_TAG_KEY: &str = "run.rowdy.user.agent";

/// Annotation key stamped onto a layer grafted in from an overlay image.
pub const OVERLAY_INDEX_URL_ANNOTATION: &str = "run.rowdy.index.url";

/// Annotation identifying an attestation manifest, dropped during collection.
pub const ATTESTATION_MANIFEST_ANNOTATION: &str = "vnd.docker.reference.type";
pub const ATTESTATION_MANIFEST_ANNOTATION_VALUE: &str = "attestation-manifest";

/// Tag/label keys mirroring the normalized image reference onto managed resources.
pub const IMAGE_NAME_TAG_KEY: &str = "run.rowdy.image.name";
pub const IMAGE_NAMESPACE_TAG_KEY: &str = "run.rowdy.image.namespace";
pub const IMAGE_REGISTRY_TAG_KEY: &str = "run.rowdy.image.registry";

/// `true` when `key` is a valid environment variable identifier: uppercase, starting
/// with a letter, containing only `[A-Z0-9_]`.
pub fn is_valid_env_key(key: &str) -> bool {
    ENV_KEY_RE.is_match(key)
}

/// `true` when `value` is a valid environment variable value under the
/// `^[\p{L}\p{Z}\p{N}_.:/=+\-@]*$` rule.
pub fn is_valid_env_value(value: &str) -> bool {
    ENV_VALUE_RE.is_match(value)
}

/// `true` when `key` is a valid resource tag key: not reserved (`aws:` prefix), 1-128
/// characters from the allowed set.
pub fn is_valid_tag_key(key: &str) -> bool {
    TAG_KEY_RE.is_match(key)
}

/// `true` when `value` is a valid resource tag value: 0-256 characters from the allowed set.
pub fn is_valid_tag_value(value: &str) -> bool {
    TAG_VALUE_RE.is_match(value)
}

/// Sanitizes a raw environment map: keys failing the identifier rule, or values
/// failing the value rule, are silently dropped.
pub fn sanitize_environment(raw: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    raw.iter()
        .filter(|(k, v)| is_valid_env_key(k) && is_valid_env_value(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Sanitizes a raw tag map against the tag key/value regexes.
pub fn sanitize_tags(raw: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    raw.iter()
        .filter(|(k, v)| is_valid_tag_key(k) && is_valid_tag_value(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The tags every managed resource carries regardless of what the caller supplied:
/// `managed-by=<package>@<version>`, `run.rowdy.user.agent=<user_agent>`, and the
/// normalized-image mirror (`run.rowdy.image.{name,namespace,registry}`) when an
/// image is known. Merged with (and taking priority over) the caller's own tags
/// before either the role or the function is tagged.
pub fn base_tags(user_agent: &str, image_name: &str, image_namespace: &str, image_registry: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(
        MANAGED_BY_TAG_KEY.to_string(),
        managed_by_tag(crate::PACKAGE_NAME, crate::PACKAGE_VERSION),
    );
    tags.insert(USER_AGENT_TAG_KEY.to_string(), user_agent.to_string());
    tags.insert(IMAGE_NAME_TAG_KEY.to_string(), image_name.to_string());
    tags.insert(IMAGE_NAMESPACE_TAG_KEY.to_string(), image_namespace.to_string());
    tags.insert(IMAGE_REGISTRY_TAG_KEY.to_string(), image_registry.to_string());
    tags
}

/// Mirrors every accepted tag key/value pair into the environment map, re-validated
/// under the environment sanitization rule since the two rule sets diverge slightly.
pub fn mirror_tags_into_environment(
    tags: &BTreeMap<String, String>,
    environment: &mut BTreeMap<String, String>,
) {
    for (key, value) in sanitize_tags(tags) {
        if is_valid_env_key(&key) && is_valid_env_value(&value) {
            environment.insert(key, value);
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `.`, per the role naming rule.
pub fn sanitize_suffix(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '.'
            }
        })
        .collect()
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`, per the qualifier/alias
/// naming rule.
pub fn sanitize_qualifier(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `$LATEST` for sandboxes; otherwise `tag ?? digest`, with `sha256:` rewritten to
/// `sha256-` and truncated to the first 12 hex characters, then sanitized.
pub fn derive_qualifier(tag: Option<&str>, digest: &str, is_sandbox: bool) -> String {
    if is_sandbox {
        return "$LATEST".to_string();
    }
    let raw = match tag {
        Some(tag) => tag.to_string(),
        None => {
            let rewritten = digest.replacen("sha256:", "sha256-", 1);
            rewritten.chars().take("sha256-".len() + 12).collect()
        }
    };
    sanitize_qualifier(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_validation() {
        assert!(is_valid_env_key("FOO"));
        assert!(is_valid_env_key("FOO_BAR2"));
        assert!(!is_valid_env_key("foo"));
        assert!(!is_valid_env_key("2FOO"));
        assert!(!is_valid_env_key(""));
    }

    #[test]
    fn env_value_validation() {
        assert!(is_valid_env_value("hello world"));
        assert!(is_valid_env_value("a/b:c=d+e-f_g.h@i"));
        assert!(!is_valid_env_value("bad\"quote"));
        assert!(is_valid_env_value(""));
    }

    #[test]
    fn tag_key_rejects_aws_prefix() {
        assert!(!is_valid_tag_key("aws:cloudformation:stack-name"));
        assert!(is_valid_tag_key("Name"));
        assert!(is_valid_tag_key("owner:team"));
    }

    #[test]
    fn tag_key_only_rejects_aws_colon_as_a_prefix() {
        // "aws:" appearing anywhere other than the start is not reserved.
        assert!(is_valid_tag_key("myaws:team"));
        assert!(is_valid_tag_key("team-aws:prod"));
    }

    #[test]
    fn tag_key_length_bounds() {
        assert!(!is_valid_tag_key(""));
        assert!(is_valid_tag_key(&"a".repeat(128)));
        assert!(!is_valid_tag_key(&"a".repeat(129)));
    }

    #[test]
    fn sanitize_environment_drops_invalid_entries() {
        let mut raw = BTreeMap::new();
        raw.insert("GOOD_KEY".to_string(), "value".to_string());
        raw.insert("bad-key".to_string(), "value".to_string());
        raw.insert("ANOTHER".to_string(), "bad\"value".to_string());
        let sanitized = sanitize_environment(&raw);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized.get("GOOD_KEY"), Some(&"value".to_string()));
    }

    #[test]
    fn mirrors_only_valid_tags_into_environment() {
        let mut tags = BTreeMap::new();
        tags.insert("Team".to_string(), "platform".to_string());
        tags.insert("aws:reserved".to_string(), "x".to_string());
        let mut env = BTreeMap::new();
        mirror_tags_into_environment(&tags, &mut env);
        // "Team" is a valid tag key but not a valid env key (lowercase letters present),
        // so it is NOT mirrored; this documents the (rare) case where sanitization
        // rules diverge between the two maps.
        assert!(env.is_empty());

        let mut tags2 = BTreeMap::new();
        tags2.insert("STAGE".to_string(), "prod".to_string());
        let mut env2 = BTreeMap::new();
        mirror_tags_into_environment(&tags2, &mut env2);
        assert_eq!(env2.get("STAGE"), Some(&"prod".to_string()));
    }

    #[test]
    fn base_tags_carries_managed_by_and_image_mirror() {
        let tags = base_tags("rowdy/0.1.0", "nginx", "library", "registry-1.docker.io");
        assert_eq!(tags.get(MANAGED_BY_TAG_KEY), Some(&format!("rowdy@{}", crate::PACKAGE_VERSION)));
        assert_eq!(tags.get(USER_AGENT_TAG_KEY), Some(&"rowdy/0.1.0".to_string()));
        assert_eq!(tags.get(IMAGE_NAME_TAG_KEY), Some(&"nginx".to_string()));
        assert_eq!(tags.get(IMAGE_NAMESPACE_TAG_KEY), Some(&"library".to_string()));
        assert_eq!(tags.get(IMAGE_REGISTRY_TAG_KEY), Some(&"registry-1.docker.io".to_string()));
    }

    #[test]
    fn suffix_sanitization_replaces_invalid_chars() {
        assert_eq!(sanitize_suffix("abc/def:123"), "abc.def.123");
        assert_eq!(sanitize_suffix("abc-def_123.x"), "abc-def_123.x");
    }

    #[test]
    fn qualifier_sanitization_replaces_invalid_chars() {
        assert_eq!(sanitize_qualifier("sha256:abcdef"), "sha256_abcdef");
        assert_eq!(sanitize_qualifier("v1.2.3"), "v1_2_3");
    }

    #[test]
    fn derive_qualifier_sandbox_is_always_latest() {
        assert_eq!(derive_qualifier(Some("v1"), "sha256:abc", true), "$LATEST");
    }

    #[test]
    fn derive_qualifier_prefers_tag_over_digest() {
        assert_eq!(derive_qualifier(Some("release-1.0"), "sha256:abc", false), "release-1_0");
    }

    #[test]
    fn derive_qualifier_falls_back_to_digest() {
        let digest = format!("sha256:{}", "b".repeat(64));
        assert_eq!(derive_qualifier(None, &digest, false), "sha256-bbbbbbbbbbbb");
    }
}
