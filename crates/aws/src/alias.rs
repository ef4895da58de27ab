use anyhow::{anyhow, Result};
use aws_sdk_lambda::types::{Cors, FunctionUrlAuthType, InvokeMode};
use aws_sdk_lambda::Client as LambdaClient;
pub use rowdy_core::tags::derive_qualifier;

const PUBLIC_ACCESS_SID: &str = "FunctionURLAllowPublicAccess";
const INVOKE_ACCESS_SID: &str = "FunctionURLInvokeAllowPublicAccess";

/// Observed state of the alias and its public invocation URL.
#[derive(Clone, Debug)]
pub struct AliasState {
    pub alias_arn: String,
    pub function_url: String,
}

pub struct DesiredAlias {
    pub function_name: String,
    pub qualifier: String,
    pub function_version: String,
}

/// `UpdateAlias`/`CreateAlias` -> `UpdateFunctionUrlConfig`/`CreateFunctionUrlConfig`
/// -> `GetPolicy` + conditional `AddPermission` for both resource-policy statements
/// required for unauthenticated invocation.
pub async fn reconcile(client: &LambdaClient, desired: &DesiredAlias) -> Result<AliasState> {
    let alias_arn = reconcile_alias(client, desired).await?;
    let function_url = reconcile_function_url(client, desired).await?;
    ensure_public_permission(client, desired).await?;
    Ok(AliasState { alias_arn, function_url })
}

async fn reconcile_alias(client: &LambdaClient, desired: &DesiredAlias) -> Result<String> {
    let existing = client
        .get_alias()
        .function_name(&desired.function_name)
        .name(&desired.qualifier)
        .send()
        .await;

    let output = match existing {
        Ok(_) => client
            .update_alias()
            .function_name(&desired.function_name)
            .name(&desired.qualifier)
            .function_version(&desired.function_version)
            .send()
            .await
            .map_err(|e| anyhow!("UpdateAlias failed: {e}"))?,
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_resource_not_found_exception())
            {
                client
                    .create_alias()
                    .function_name(&desired.function_name)
                    .name(&desired.qualifier)
                    .function_version(&desired.function_version)
                    .send()
                    .await
                    .map_err(|e| anyhow!("CreateAlias failed: {e}"))?
            } else {
                return Err(anyhow!("GetAlias failed: {err}"));
            }
        }
    };

    output
        .alias_arn()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("alias response missing AliasArn"))
}

async fn reconcile_function_url(client: &LambdaClient, desired: &DesiredAlias) -> Result<String> {
    let cors = Cors::builder()
        .allow_credentials(true)
        .allow_origins("*")
        .allow_methods("*")
        .allow_headers("*")
        .expose_headers("*")
        .max_age(3600)
        .build();

    let existing = client
        .get_function_url_config()
        .function_name(&desired.function_name)
        .qualifier(&desired.qualifier)
        .send()
        .await;

    let output = match existing {
        Ok(_) => client
            .update_function_url_config()
            .function_name(&desired.function_name)
            .qualifier(&desired.qualifier)
            .auth_type(FunctionUrlAuthType::None)
            .cors(cors)
            .invoke_mode(InvokeMode::ResponseStream)
            .send()
            .await
            .map_err(|e| anyhow!("UpdateFunctionUrlConfig failed: {e}"))?,
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_resource_not_found_exception())
            {
                client
                    .create_function_url_config()
                    .function_name(&desired.function_name)
                    .qualifier(&desired.qualifier)
                    .auth_type(FunctionUrlAuthType::None)
                    .cors(cors)
                    .invoke_mode(InvokeMode::ResponseStream)
                    .send()
                    .await
                    .map_err(|e| anyhow!("CreateFunctionUrlConfig failed: {e}"))?
            } else {
                return Err(anyhow!("GetFunctionUrlConfig failed: {err}"));
            }
        }
    };

    output
        .function_url()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("function URL response missing FunctionUrl"))
}

async fn ensure_public_permission(client: &LambdaClient, desired: &DesiredAlias) -> Result<()> {
    let policy = client
        .get_policy()
        .function_name(&desired.function_name)
        .qualifier(&desired.qualifier)
        .send()
        .await;

    let existing_sids: Vec<String> = match policy {
        Ok(output) => output
            .policy()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|doc| doc.get("Statement").cloned())
            .and_then(|statements| statements.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|s| s.get("Sid").and_then(|sid| sid.as_str()).map(|s| s.to_string()))
            .collect(),
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_resource_not_found_exception())
            {
                Vec::new()
            } else {
                return Err(anyhow!("GetPolicy failed: {err}"));
            }
        }
    };

    for (sid, action) in [
        (PUBLIC_ACCESS_SID, "lambda:InvokeFunctionUrl"),
        (INVOKE_ACCESS_SID, "lambda:InvokeFunction"),
    ] {
        if existing_sids.iter().any(|s| s == sid) {
            continue;
        }
        client
            .add_permission()
            .function_name(&desired.function_name)
            .qualifier(&desired.qualifier)
            .statement_id(sid)
            .action(action)
            .principal("*")
            .function_url_auth_type(FunctionUrlAuthType::None)
            .send()
            .await
            .map_err(|e| anyhow!("AddPermission({sid}) failed: {e}"))?;
    }
    Ok(())
}

/// Container deletes remove only the alias; sandbox deletes additionally tear down
/// the function and its role (the caller handles the function/role disposal).
pub async fn delete_alias(client: &LambdaClient, function_name: &str, qualifier: &str) -> Result<()> {
    client
        .delete_alias()
        .function_name(function_name)
        .name(qualifier)
        .send()
        .await
        .map_err(|e| anyhow!("DeleteAlias failed: {e}"))?;
    Ok(())
}

pub async fn delete_function(client: &LambdaClient, function_name: &str) -> Result<()> {
    client
        .delete_function()
        .function_name(function_name)
        .send()
        .await
        .map_err(|e| anyhow!("DeleteFunction failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_shared_qualifier_rule() {
        assert_eq!(derive_qualifier(Some("v1"), "sha256:abc", true), "$LATEST");
    }
}
