use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use aws_sdk_iam::Client as IamClient;
use rowdy_core::tags::sanitize_suffix;
use serde_json::json;

pub const INLINE_POLICY_NAME: &str = "RowdyPolicy";

/// What's known about an IAM role after a read-before-write cycle.
#[derive(Clone, Debug)]
pub struct RoleState {
    pub role_name: String,
    pub role_arn: String,
    pub role_id: String,
}

/// The caller-visible shape of the function's desired IAM posture: the managed-by
/// tag plus any additional allow statements the caller supplied.
pub struct DesiredRole {
    pub namespace: String,
    pub name: String,
    pub human_name: Option<String>,
    pub role_statements: Vec<serde_json::Value>,
    pub tags: BTreeMap<String, String>,
}

impl DesiredRole {
    /// `<namespace>+<name>@<suffix>.rowdy.run` when a human name is provided, else
    /// `<namespace>+<name>@rowdy.run`. `<suffix>` has every character outside
    /// `[A-Za-z0-9._-]` replaced with `.`.
    pub fn role_name(&self) -> String {
        match &self.human_name {
            Some(human_name) => format!(
                "{}+{}@{}.rowdy.run",
                self.namespace,
                self.name,
                sanitize_suffix(human_name)
            ),
            None => format!("{}+{}@rowdy.run", self.namespace, self.name),
        }
    }

    fn trust_policy(&self) -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "lambda.amazonaws.com" },
                "Action": "sts:AssumeRole",
            }]
        })
        .to_string()
    }

    fn inline_policy(&self) -> String {
        let mut statements = vec![baseline_statement()];
        statements.extend(self.role_statements.clone());
        json!({
            "Version": "2012-10-17",
            "Statement": statements,
        })
        .to_string()
    }
}

fn baseline_statement() -> serde_json::Value {
    json!({
        "Effect": "Allow",
        "Action": [
            "logs:CreateLogGroup",
            "logs:CreateLogStream",
            "logs:PutLogEvents",
            "xray:PutTraceSegments",
            "xray:PutTelemetryRecords",
            "ec2:CreateNetworkInterface",
            "ec2:DescribeNetworkInterfaces",
            "ec2:DeleteNetworkInterface",
        ],
        "Resource": "*",
    })
}

/// The common reconciler envelope applied to the IAM role: read, create-or-update,
/// tag, re-read. 404 during read is treated as absent; 404 immediately after a
/// create is treated as "create succeeded, read lagging" and retried. Built out of
/// the same `read`/`create`/`update`/`tag` primitives `rowdy_controller::reconcile`'s
/// `CloudResource` impl for this type drives directly.
pub async fn reconcile(client: &IamClient, desired: &DesiredRole, retries: u32) -> Result<RoleState> {
    let role_name = desired.role_name();
    let existing = read(client, &role_name).await?;

    if existing.is_none() {
        create(client, desired).await?;
    } else {
        update(client, desired).await?;
    }
    tag(client, desired).await?;

    for attempt in 0..retries {
        if let Some(state) = read(client, &role_name).await? {
            return Ok(state);
        }
        log::debug!("role {role_name} not yet visible, retry {attempt}/{retries}");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    Err(anyhow!("role {role_name} did not become visible after {retries} retries"))
}

/// Creates the role and its trust policy, then the inline policy (callers still owe
/// `tag` afterward — see `reconcile`).
pub async fn create(client: &IamClient, desired: &DesiredRole) -> Result<()> {
    let role_name = desired.role_name();
    client
        .create_role()
        .role_name(&role_name)
        .description(format!("rowdy-managed role for {}/{}", desired.namespace, desired.name))
        .assume_role_policy_document(desired.trust_policy())
        .send()
        .await
        .map_err(|e| anyhow!("CreateRole failed: {e}"))?;
    put_inline_policy(client, desired).await
}

/// Updates the role description/trust policy and re-puts the inline policy.
pub async fn update(client: &IamClient, desired: &DesiredRole) -> Result<()> {
    let role_name = desired.role_name();
    client
        .update_role()
        .role_name(&role_name)
        .description(format!("rowdy-managed role for {}/{}", desired.namespace, desired.name))
        .send()
        .await
        .map_err(|e| anyhow!("UpdateRole failed: {e}"))?;
    client
        .update_assume_role_policy()
        .role_name(&role_name)
        .policy_document(desired.trust_policy())
        .send()
        .await
        .map_err(|e| anyhow!("UpdateAssumeRolePolicy failed: {e}"))?;
    put_inline_policy(client, desired).await
}

async fn put_inline_policy(client: &IamClient, desired: &DesiredRole) -> Result<()> {
    client
        .put_role_policy()
        .role_name(desired.role_name())
        .policy_name(INLINE_POLICY_NAME)
        .policy_document(desired.inline_policy())
        .send()
        .await
        .map_err(|e| anyhow!("PutRolePolicy failed: {e}"))?;
    Ok(())
}

pub async fn tag(client: &IamClient, desired: &DesiredRole) -> Result<()> {
    client
        .tag_role()
        .role_name(desired.role_name())
        .set_tags(Some(
            desired
                .tags
                .iter()
                .map(|(k, v)| aws_sdk_iam::types::Tag::builder().key(k).value(v).build().unwrap())
                .collect(),
        ))
        .send()
        .await
        .map_err(|e| anyhow!("TagRole failed: {e}"))?;
    Ok(())
}

pub async fn read(client: &IamClient, role_name: &str) -> Result<Option<RoleState>> {
    match client.get_role().role_name(role_name).send().await {
        Ok(output) => {
            let role = output
                .role()
                .ok_or_else(|| anyhow!("GetRole response missing role"))?;
            Ok(Some(RoleState {
                role_name: role.role_name().to_string(),
                role_arn: role.arn().to_string(),
                role_id: role.role_id().to_string(),
            }))
        }
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_no_such_entity_exception())
            {
                Ok(None)
            } else {
                Err(anyhow!("GetRole failed: {err}"))
            }
        }
    }
}

/// Removes the inline policy then the role itself, for sandbox deletes.
pub async fn dispose(client: &IamClient, role_name: &str) -> Result<()> {
    let _ = client
        .delete_role_policy()
        .role_name(role_name)
        .policy_name(INLINE_POLICY_NAME)
        .send()
        .await;
    client
        .delete_role()
        .role_name(role_name)
        .send()
        .await
        .map_err(|e| anyhow!("DeleteRole failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_with_human_name() {
        let desired = DesiredRole {
            namespace: "acme".to_string(),
            name: "worker".to_string(),
            human_name: Some("My App!".to_string()),
            role_statements: vec![],
            tags: BTreeMap::new(),
        };
        assert_eq!(desired.role_name(), "acme+worker@My.App..rowdy.run");
    }

    #[test]
    fn role_name_without_human_name() {
        let desired = DesiredRole {
            namespace: "acme".to_string(),
            name: "worker".to_string(),
            human_name: None,
            role_statements: vec![],
            tags: BTreeMap::new(),
        };
        assert_eq!(desired.role_name(), "acme+worker@rowdy.run");
    }
}
