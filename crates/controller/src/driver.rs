use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use aws_sdk_iam::Client as IamClient;
use aws_sdk_lambda::Client as LambdaClient;
use rowdyaws::alias::{self, DesiredAlias};
use rowdyaws::function::{self, DesiredFunction};
use rowdyaws::role::{self, DesiredRole};
use rowdy_core::tags::derive_qualifier;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bundle::DesiredFunctionBundle;
use crate::reconcile::{converge, RoleResource};
use crate::state::{ObservedState, StateCell};

/// The final image reference produced by the OCI transfer pipeline (modules A-G),
/// decoupled from `rowdy-oci`'s own `ImageReference` type so this crate only depends
/// on the handful of fields the convergence controller actually needs.
#[derive(Clone, Debug)]
pub struct ResolvedImage {
    pub image_uri: String,
    pub tag: Option<String>,
    pub digest: String,
}

/// Composes H (IAM role), I (Lambda function), and J (alias/URL/permission) into the
/// streaming state machine described in §4.K: creates, then the strict update
/// sequence, then tagging, emitting an `ObservedState` snapshot after each step.
pub struct FunctionController {
    iam: IamClient,
    lambda: LambdaClient,
    namespace: String,
    retries: u32,
}

/// A convergence in progress: the caller subscribes to `states` for live updates and
/// awaits `handle` for the final result (or the first fatal cause, per §7's
/// "`observe()` ... errors with the first fatal cause").
pub struct ObserveHandle {
    pub states: watch::Receiver<ObservedState>,
    pub handle: JoinHandle<Result<ObservedState>>,
}

impl FunctionController {
    pub fn new(iam: IamClient, lambda: LambdaClient, namespace: String, retries: u32) -> FunctionController {
        FunctionController { iam, lambda, namespace, retries }
    }

    /// Runs one full convergence pass toward `bundle`'s desired state for `image`,
    /// emitting `ObservedState` updates as each resource resolves. Returns a handle
    /// the caller can subscribe to immediately and await for the terminal result.
    pub fn observe(self: Arc<Self>, image: ResolvedImage, bundle: DesiredFunctionBundle) -> ObserveHandle {
        let (cell, receiver) = StateCell::new();
        let controller = self;
        let handle = tokio::spawn(async move { controller.converge(cell, image, bundle).await });
        ObserveHandle { states: receiver, handle }
    }

    async fn converge(
        &self,
        cell: StateCell,
        image: ResolvedImage,
        bundle: DesiredFunctionBundle,
    ) -> Result<ObservedState> {
        let human_name = bundle.name.clone();

        // Step 1: IAM role. CreateFunction's RoleArn argument tolerates a role whose
        // trust policy hasn't finished propagating (NotFound-during-read is retried in
        // the reconciler's re-read loop), so the role is always resolved first rather
        // than genuinely raced against the function the way §4.K's "share no fields"
        // phrasing suggests; see DESIGN.md for why literal parallelism isn't used here.
        let desired_role = DesiredRole {
            namespace: self.namespace.clone(),
            name: function_label(&bundle),
            human_name: human_name.clone(),
            role_statements: bundle.role_statements.clone(),
            tags: bundle.tags.clone(),
        };
        let role_state = converge(&RoleResource { client: &self.iam, desired: &desired_role }, self.retries).await?;
        cell.update(|s| {
            s.role_name = Some(role_state.role_name.clone());
            s.role_arn = Some(role_state.role_arn.clone());
            s.role_id = Some(role_state.role_id.clone());
        });
        log::info!("role {} converged", role_state.role_name);

        // Step 2: Lambda function config/code/version.
        let function_name = role_state.role_id.clone();
        let desired_function = DesiredFunction {
            function_name: function_name.clone(),
            role_arn: role_state.role_arn.clone(),
            image_uri: image.image_uri.clone(),
            memory_mb: bundle.memory_mb,
            environment: bundle.environment.clone(),
            entrypoint: bundle.entrypoint.clone(),
            command: bundle.command.clone(),
            working_dir: bundle.working_dir.clone(),
        };
        let function_state = function::reconcile(&self.lambda, &desired_function, self.retries).await?;
        cell.update(|s| {
            s.function_arn = Some(function_state.function_arn.clone());
            s.image_uri = Some(function_state.image_uri.clone());
            s.function_version = Some(function_state.function_version.clone());
        });
        log::info!("function {function_name} converged at version {}", function_state.function_version);

        // Step 3: alias + URL + permissions, or the sandbox's bare $LATEST qualifier.
        let qualifier = derive_qualifier(image.tag.as_deref(), &image.digest, bundle.is_sandbox);
        cell.update(|s| s.qualifier = Some(qualifier.clone()));

        if !bundle.is_sandbox {
            let desired_alias = DesiredAlias {
                function_name: function_name.clone(),
                qualifier: qualifier.clone(),
                function_version: function_state.function_version.clone(),
            };
            let alias_state = alias::reconcile(&self.lambda, &desired_alias).await?;
            cell.update(|s| {
                s.alias_arn = Some(alias_state.alias_arn.clone());
                s.function_url = Some(alias_state.function_url.clone());
            });
            log::info!("alias {qualifier} converged with url {}", alias_state.function_url);
        }

        // Step 4: resource tags on the function itself (the role was already tagged
        // inside `role::reconcile`'s own envelope).
        tag_function(&self.lambda, &function_state.function_arn, &bundle.tags).await?;

        Ok(cell.current())
    }

    /// Deletes a container's alias (which cascades to its URL config and public-invoke
    /// permissions, per §4.J) while leaving the function and role intact for other
    /// aliases/tags of the same function. See DESIGN.md for the cascade-reliability
    /// Open Question.
    pub async fn delete_container(&self, function_name: &str, qualifier: &str) -> Result<()> {
        alias::delete_alias(&self.lambda, function_name, qualifier).await
    }

    /// Deletes a sandbox entirely: the function, then the role's inline policy, then
    /// the role.
    pub async fn delete_sandbox(&self, function_name: &str, role_name: &str) -> Result<()> {
        alias::delete_function(&self.lambda, function_name).await?;
        role::dispose(&self.iam, role_name).await
    }
}

async fn tag_function(lambda: &LambdaClient, function_arn: &str, tags: &BTreeMap<String, String>) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    lambda
        .tag_resource()
        .resource(function_arn)
        .set_tags(Some(tags.clone()))
        .send()
        .await
        .map_err(|e| anyhow!("TagResource failed: {e}"))?;
    Ok(())
}

/// The `name` half of the role-naming rule's `<namespace>+<name>@...` shape: the
/// caller's human label, sanitized the same way, or a short stable fallback when none
/// was given.
fn function_label(bundle: &DesiredFunctionBundle) -> String {
    bundle
        .name
        .clone()
        .unwrap_or_else(|| "function".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_label_falls_back_when_unnamed() {
        let bundle = DesiredFunctionBundle {
            image: "nginx".to_string(),
            name: None,
            memory_mb: 128,
            environment: BTreeMap::new(),
            tags: BTreeMap::new(),
            entrypoint: vec![],
            command: vec![],
            working_dir: None,
            routes: None,
            role_statements: vec![],
            is_sandbox: true,
        };
        assert_eq!(function_label(&bundle), "function");
    }
}
