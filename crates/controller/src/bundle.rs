use std::collections::BTreeMap;

use rowdy_core::tags::{mirror_tags_into_environment, sanitize_environment, sanitize_tags};

/// Default memory, in MB, for a function with no explicit `memory` request (§3).
pub const DEFAULT_MEMORY_MB: i32 = 128;
/// Every desired-state request is clamped up to this floor; Lambda itself enforces
/// the same minimum, but the bundle normalizes it before any reconciler sees it.
pub const MIN_MEMORY_MB: i32 = 128;

/// A user's desired-state request for a single function: the raw image reference,
/// everything needed to converge IAM/Lambda resources toward it, and whether it is a
/// sandbox (no alias, no URL, qualifier is always `$LATEST`) or a container (named,
/// aliased, has a public function URL).
#[derive(Clone, Debug)]
pub struct DesiredFunctionBundle {
    pub image: String,
    pub name: Option<String>,
    pub memory_mb: i32,
    pub environment: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    /// Opaque data-URL payload; this crate neither parses nor evaluates it (route rule
    /// evaluation is an out-of-scope external collaborator, per spec.md §1) but carries
    /// it through so a caller that does evaluate routes can be wired up later.
    pub routes: Option<String>,
    pub role_statements: Vec<serde_json::Value>,
    /// True for a sandbox (`$LATEST`, no alias/URL); false for a named, aliased
    /// container. Not a spec.md §3 field in its own right, but the distinction the
    /// qualifier/alias naming rule (§4.J) and the two delete paths (§4.J, §4.K) are
    /// both stated in terms of.
    pub is_sandbox: bool,
}

/// Raw, pre-sanitization inputs a caller supplies; `DesiredFunctionBundle::from_raw`
/// applies every §3 sanitization/mirroring invariant when converting one of these.
pub struct RawFunctionBundle {
    pub image: String,
    pub name: Option<String>,
    pub memory_mb: Option<i32>,
    pub environment: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub routes: Option<String>,
    pub role_statements: Vec<serde_json::Value>,
    pub is_sandbox: bool,
}

impl DesiredFunctionBundle {
    /// Sanitizes environment keys/values and tag keys/values, then mirrors every
    /// accepted tag into the environment map under the same sanitization rule — the
    /// §3 invariant that every accepted tag is also visible to the running function.
    pub fn from_raw(raw: RawFunctionBundle) -> DesiredFunctionBundle {
        let mut environment = sanitize_environment(&raw.environment);
        let tags = sanitize_tags(&raw.tags);
        mirror_tags_into_environment(&tags, &mut environment);

        DesiredFunctionBundle {
            image: raw.image,
            name: raw.name,
            memory_mb: raw.memory_mb.unwrap_or(DEFAULT_MEMORY_MB).max(MIN_MEMORY_MB),
            environment,
            tags,
            entrypoint: raw.entrypoint,
            command: raw.command,
            working_dir: raw.working_dir,
            routes: raw.routes,
            role_statements: raw.role_statements,
            is_sandbox: raw.is_sandbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_clamped_to_floor() {
        let raw = RawFunctionBundle {
            image: "nginx".to_string(),
            name: None,
            memory_mb: Some(64),
            environment: BTreeMap::new(),
            tags: BTreeMap::new(),
            entrypoint: vec![],
            command: vec![],
            working_dir: None,
            routes: None,
            role_statements: vec![],
            is_sandbox: true,
        };
        let bundle = DesiredFunctionBundle::from_raw(raw);
        assert_eq!(bundle.memory_mb, MIN_MEMORY_MB);
    }

    #[test]
    fn default_memory_is_128() {
        let raw = RawFunctionBundle {
            image: "nginx".to_string(),
            name: None,
            memory_mb: None,
            environment: BTreeMap::new(),
            tags: BTreeMap::new(),
            entrypoint: vec![],
            command: vec![],
            working_dir: None,
            routes: None,
            role_statements: vec![],
            is_sandbox: true,
        };
        assert_eq!(DesiredFunctionBundle::from_raw(raw).memory_mb, DEFAULT_MEMORY_MB);
    }

    #[test]
    fn accepted_tags_are_mirrored_into_environment() {
        let mut tags = BTreeMap::new();
        tags.insert("STAGE".to_string(), "prod".to_string());
        let raw = RawFunctionBundle {
            image: "nginx".to_string(),
            name: None,
            memory_mb: None,
            environment: BTreeMap::new(),
            tags,
            entrypoint: vec![],
            command: vec![],
            working_dir: None,
            routes: None,
            role_statements: vec![],
            is_sandbox: false,
        };
        let bundle = DesiredFunctionBundle::from_raw(raw);
        assert_eq!(bundle.environment.get("STAGE"), Some(&"prod".to_string()));
        assert_eq!(bundle.tags.get("STAGE"), Some(&"prod".to_string()));
    }
}
