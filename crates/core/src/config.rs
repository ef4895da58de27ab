use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Top level configuration for every rowdy binary.
///
/// A TOML file read from disk, with every field defaulted so a partial or
/// absent file is always valid. Fields here
/// double as the documented knobs for values better left as configuration than fixed
/// literals: the default registry host, the concurrency budget override, and the
/// reconciler retry count.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RowdyConfig {
    /// Fallback registry host used by the image reference normalizer when the input
    /// has fewer than three path segments. History shows both `registry-1.docker.io`
    /// and `mirror.gcr.io` in use; this must stay configuration, not a hard-coded literal.
    pub default_registry: String,

    /// Overrides the lazily-computed `clamp(cpuCount, 1, 10)` concurrency budget.
    /// `None` means compute it from the available parallelism.
    pub concurrency: Option<usize>,

    /// Cadence, in milliseconds, of the aggregate transfer progress summary.
    pub progress_interval_ms: u64,

    /// Retry count for the reconciler envelope driving convergence.
    pub reconciler_retries: u32,

    /// AWS region; falls back to the SDK's default credential/region chain when unset.
    pub aws_region: Option<String>,

    /// Overrides the inferred ECR registry host. Mirrors `AWS_ECR_REGISTRY`.
    pub aws_ecr_registry_override: Option<String>,
}

impl Default for RowdyConfig {
    fn default() -> Self {
        RowdyConfig {
            default_registry: default_registry(),
            concurrency: None,
            progress_interval_ms: default_progress_interval_ms(),
            reconciler_retries: default_reconciler_retries(),
            aws_region: None,
            aws_ecr_registry_override: None,
        }
    }
}

fn default_registry() -> String {
    "registry-1.docker.io".to_string()
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_reconciler_retries() -> u32 {
    10
}

impl RowdyConfig {
    pub async fn load(path: &Path) -> Result<RowdyConfig> {
        if path.exists() {
            let content = fs::read_to_string(path).await?;
            let config: RowdyConfig = toml::from_str(&content)?;
            Ok(config.with_env_overrides())
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, "").await?;
            Ok(RowdyConfig::default().with_env_overrides())
        }
    }

    /// Applies the environment variable overrides consumed at process start, layered
    /// on top of whatever the file config set. The AWS credential variables themselves
    /// are not read here; they flow into the AWS SDK's own default credential chain.
    fn with_env_overrides(mut self) -> RowdyConfig {
        if let Ok(region) = std::env::var("AWS_REGION") {
            self.aws_region = Some(region);
        }
        if let Ok(registry) = std::env::var("AWS_ECR_REGISTRY") {
            self.aws_ecr_registry_override = Some(registry);
        }
        self
    }

    /// The concurrency budget: `clamp(cpuCount, 1, 10)`, computed lazily once per
    /// process unless overridden by configuration.
    pub fn concurrency(&self) -> usize {
        self.concurrency
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .clamp(1, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = RowdyConfig::load(&path).await.unwrap();
        assert_eq!(config.default_registry, "registry-1.docker.io");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn loads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_registry = \"mirror.gcr.io\"\n")
            .await
            .unwrap();
        let config = RowdyConfig::load(&path).await.unwrap();
        assert_eq!(config.default_registry, "mirror.gcr.io");
        assert_eq!(config.reconciler_retries, 10);
    }

    #[test]
    fn concurrency_is_clamped() {
        let mut config = RowdyConfig::default();
        config.concurrency = Some(64);
        assert_eq!(config.concurrency(), 10);
        config.concurrency = Some(0);
        assert_eq!(config.concurrency(), 1);
    }
}
