use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rowdycontroller::{DesiredFunctionBundle, RawFunctionBundle, ResolvedImage};

use crate::RowdyDaemon;

/// `CreateContainer(name, image, memory, command, args, env, labels, workingDir)`
/// (§6). `image` is the already-transferred target-registry reference
/// `pull_image` returned, split here into its URI/tag/digest for the function
/// reconciler; `command` maps to the image's entrypoint override and `args` to
/// its command override, matching container-runtime convention.
pub struct CreateContainerRequest {
    pub name: Option<String>,
    pub image_uri: String,
    pub tag: Option<String>,
    pub digest: String,
    pub memory_mb: Option<i32>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub role_statements: Vec<serde_json::Value>,
    /// Not itself a §6 field: distinguishes a sandbox (`$LATEST`, no alias/URL)
    /// from a container (named, aliased), per the qualifier/alias naming rule (§4.J).
    pub is_sandbox: bool,
}

/// One entry of `ListContainers`'s result. `id` is `<function-name>/<qualifier>`,
/// the pair `remove_container` needs to address either a container's alias or a
/// sandbox's whole function.
#[derive(Clone, Debug)]
pub struct Container {
    pub id: String,
    pub name: Option<String>,
    pub image_uri: String,
    pub qualifier: String,
    pub function_arn: String,
    pub function_url: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// `ListContainers(filter: {id?, labelSelector?})` (§6)'s filter argument.
#[derive(Default)]
pub struct ContainerFilter {
    pub id: Option<String>,
    pub label_selector: BTreeMap<String, String>,
}

impl ContainerFilter {
    fn matches(&self, container: &Container) -> bool {
        if let Some(id) = &self.id {
            if &container.id != id {
                return false;
            }
        }
        self.label_selector
            .iter()
            .all(|(k, v)| container.labels.get(k) == Some(v))
    }
}

/// Converges IAM role, Lambda function, and alias/URL/permissions toward
/// `request`, returning the `AliasArn` (or, for a sandbox with no alias, the bare
/// `FunctionArn`) §6 specifies as `CreateContainer`'s result.
pub async fn create_container(daemon: &RowdyDaemon, request: CreateContainerRequest) -> Result<String> {
    let bundle = DesiredFunctionBundle::from_raw(RawFunctionBundle {
        image: request.image_uri.clone(),
        name: request.name,
        memory_mb: request.memory_mb,
        environment: request.env,
        tags: request.labels,
        entrypoint: request.command,
        command: request.args,
        working_dir: request.working_dir,
        routes: None,
        role_statements: request.role_statements,
        is_sandbox: request.is_sandbox,
    });

    let resolved = ResolvedImage {
        image_uri: request.image_uri,
        tag: request.tag,
        digest: request.digest,
    };

    let controller = Arc::new(daemon.controller());
    let handle = controller.observe(resolved, bundle);
    let state = handle
        .handle
        .await
        .map_err(|e| anyhow!("convergence task panicked: {e}"))??;

    state
        .alias_arn
        .or(state.function_arn)
        .ok_or_else(|| anyhow!("convergence completed without producing an alias or function ARN"))
}

/// `ListContainers`: enumerates every Lambda function this daemon's `namespace`
/// manages (via `managed-by` tag, mirrored by the IAM role reconciler's tagging
/// step) and every alias/qualifier on it, applying `filter` client-side.
pub async fn list_containers(daemon: &RowdyDaemon, filter: &ContainerFilter) -> Result<Vec<Container>> {
    let mut containers = Vec::new();
    let mut next_marker = None;

    loop {
        let mut request = daemon.aws.lambda.list_functions();
        if let Some(marker) = &next_marker {
            request = request.marker(marker);
        }
        let output = request.send().await.map_err(|e| anyhow!("ListFunctions failed: {e}"))?;

        for function in output.functions() {
            let Some(function_name) = function.function_name() else {
                continue;
            };
            let Some(function_arn) = function.function_arn() else {
                continue;
            };

            let labels = list_tags(daemon, function_arn).await?;
            if !labels.contains_key("managed-by") {
                continue;
            }

            let image_uri = daemon
                .aws
                .lambda
                .get_function()
                .function_name(function_name)
                .send()
                .await
                .ok()
                .and_then(|r| r.code().and_then(|c| c.image_uri()).map(|s| s.to_string()))
                .unwrap_or_default();

            let aliases = daemon
                .aws
                .lambda
                .list_aliases()
                .function_name(function_name)
                .send()
                .await
                .map_err(|e| anyhow!("ListAliases failed: {e}"))?;

            for alias in aliases.aliases() {
                let qualifier = alias.name().unwrap_or("$LATEST").to_string();
                let function_url = daemon
                    .aws
                    .lambda
                    .get_function_url_config()
                    .function_name(function_name)
                    .qualifier(&qualifier)
                    .send()
                    .await
                    .ok()
                    .and_then(|r| r.function_url().map(|s| s.to_string()));

                let container = Container {
                    id: format!("{function_name}/{qualifier}"),
                    name: function.description().map(|s| s.to_string()),
                    image_uri: image_uri.clone(),
                    qualifier,
                    function_arn: function_arn.to_string(),
                    function_url,
                    labels: labels.clone(),
                };
                if filter.matches(&container) {
                    containers.push(container);
                }
            }
        }

        next_marker = output.next_marker().map(|s| s.to_string());
        if next_marker.is_none() {
            break;
        }
    }

    Ok(containers)
}

async fn list_tags(daemon: &RowdyDaemon, function_arn: &str) -> Result<BTreeMap<String, String>> {
    let output = daemon
        .aws
        .lambda
        .list_tags()
        .resource(function_arn)
        .send()
        .await
        .map_err(|e| anyhow!("ListTags failed: {e}"))?;
    Ok(output.tags().cloned().unwrap_or_default())
}

/// `RemoveContainer(containerId)`: parses the `<function-name>/<qualifier>` id
/// `list_containers` produces and dispatches to the container or sandbox delete
/// path per §4.J — container deletes remove only the alias (cascading to the URL
/// and permissions); sandbox deletes (`qualifier == "$LATEST"`) remove the
/// function and role outright.
pub async fn remove_container(daemon: &RowdyDaemon, container_id: &str, role_name: Option<&str>) -> Result<()> {
    let (function_name, qualifier) = container_id
        .split_once('/')
        .ok_or_else(|| anyhow!("malformed container id: {container_id}"))?;

    let controller = daemon.controller();
    if qualifier == "$LATEST" {
        let role_name = role_name.ok_or_else(|| anyhow!("sandbox delete requires its role name"))?;
        controller.delete_sandbox(function_name, role_name).await
    } else {
        controller.delete_container(function_name, qualifier).await
    }
}
