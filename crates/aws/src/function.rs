use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use aws_sdk_lambda::types::{Environment, FunctionCode, ImageConfig};
use aws_sdk_lambda::Client as LambdaClient;
use rowdy_core::tags::is_valid_env_value;

/// The function's own observed fields after a read-before-write cycle.
#[derive(Clone, Debug)]
pub struct FunctionState {
    pub function_arn: String,
    pub function_version: String,
    pub image_uri: String,
}

/// What the caller wants the Lambda function to look like.
pub struct DesiredFunction {
    pub function_name: String,
    pub role_arn: String,
    pub image_uri: String,
    pub memory_mb: i32,
    pub environment: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
}

struct ExistingFunction {
    image_uri: String,
    version: String,
    memory_mb: i32,
    environment: BTreeMap<String, String>,
    entrypoint: Vec<String>,
    command: Vec<String>,
    working_dir: Option<String>,
}

fn needs_code_update(existing: &ExistingFunction, desired: &DesiredFunction) -> bool {
    existing.image_uri != desired.image_uri
}

fn needs_config_update(existing: &ExistingFunction, desired: &DesiredFunction) -> bool {
    existing.version == "$LATEST"
        || existing.entrypoint != desired.entrypoint
        || existing.command != desired.command
        || existing.working_dir != desired.working_dir
        || existing.memory_mb != desired.memory_mb
        || !desired
            .environment
            .iter()
            .all(|(k, v)| existing.environment.get(k) == Some(v))
}

/// `read -> if exists: update else: create -> wait for Active -> publish if changed`.
pub async fn reconcile(client: &LambdaClient, desired: &DesiredFunction, retries: u32) -> Result<FunctionState> {
    let existing = read(client, &desired.function_name).await?;

    let (updated_code, updated_config) = match &existing {
        None => {
            create(client, desired).await?;
            wait_for_active(client, &desired.function_name, retries).await?;
            (true, true)
        }
        Some(existing) => {
            let mut code = false;
            let mut config = false;
            if needs_config_update(existing, desired) {
                update_config(client, desired, existing).await?;
                wait_for_active(client, &desired.function_name, retries).await?;
                config = true;
            }
            if needs_code_update(existing, desired) {
                update_code(client, desired).await?;
                wait_for_active(client, &desired.function_name, retries).await?;
                code = true;
            }
            (code, config)
        }
    };

    let function_version = if updated_code || updated_config {
        publish(client, desired).await?
    } else {
        existing.map(|e| e.version).unwrap_or_else(|| "$LATEST".to_string())
    };

    let final_state = read(client, &desired.function_name)
        .await?
        .ok_or_else(|| anyhow!("function {} not visible after reconcile", desired.function_name))?;

    Ok(FunctionState {
        function_arn: final_state_arn(client, &desired.function_name).await?,
        function_version,
        image_uri: final_state.image_uri,
    })
}

async fn final_state_arn(client: &LambdaClient, function_name: &str) -> Result<String> {
    let output = client
        .get_function_configuration()
        .function_name(function_name)
        .send()
        .await
        .map_err(|e| anyhow!("GetFunctionConfiguration failed: {e}"))?;
    output
        .function_arn()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("GetFunctionConfiguration response missing FunctionArn"))
}

async fn read(client: &LambdaClient, function_name: &str) -> Result<Option<ExistingFunction>> {
    match client.get_function().function_name(function_name).send().await {
        Ok(output) => {
            let configuration = output
                .configuration()
                .ok_or_else(|| anyhow!("GetFunction response missing configuration"))?;
            let code = output.code();
            let image_uri = code
                .and_then(|c| c.image_uri())
                .unwrap_or_default()
                .to_string();
            let environment = configuration
                .environment()
                .and_then(|e| e.variables())
                .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            let image_config = configuration.image_config_response().and_then(|r| r.image_config());
            Ok(Some(ExistingFunction {
                image_uri,
                version: configuration.version().unwrap_or("$LATEST").to_string(),
                memory_mb: configuration.memory_size().unwrap_or(128),
                environment,
                entrypoint: image_config
                    .and_then(|c| c.entry_point())
                    .map(|v| v.to_vec())
                    .unwrap_or_default(),
                command: image_config.and_then(|c| c.command()).map(|v| v.to_vec()).unwrap_or_default(),
                working_dir: image_config.and_then(|c| c.working_directory()).map(|s| s.to_string()),
            }))
        }
        Err(err) => {
            if err
                .as_service_error()
                .is_some_and(|e| e.is_resource_not_found_exception())
            {
                Ok(None)
            } else {
                Err(anyhow!("GetFunction failed: {err}"))
            }
        }
    }
}

async fn create(client: &LambdaClient, desired: &DesiredFunction) -> Result<()> {
    client
        .create_function()
        .function_name(&desired.function_name)
        .package_type(aws_sdk_lambda::types::PackageType::Image)
        .set_architectures(Some(vec![aws_sdk_lambda::types::Architecture::X8664]))
        .timeout(900)
        .publish(false)
        .code(FunctionCode::builder().image_uri(&desired.image_uri).build())
        .role(&desired.role_arn)
        .send()
        .await
        .map_err(|e| anyhow!("CreateFunction failed: {e}"))?;
    Ok(())
}

async fn update_config(client: &LambdaClient, desired: &DesiredFunction, existing: &ExistingFunction) -> Result<()> {
    let merged = merge_environment(&existing.environment, &desired.environment);
    client
        .update_function_configuration()
        .function_name(&desired.function_name)
        .memory_size(desired.memory_mb)
        .environment(Environment::builder().set_variables(Some(merged)).build())
        .image_config(
            ImageConfig::builder()
                .set_entry_point(Some(desired.entrypoint.clone()))
                .set_command(Some(desired.command.clone()))
                .set_working_directory(desired.working_dir.clone())
                .build(),
        )
        .set_layers(Some(vec![]))
        .send()
        .await
        .map_err(|e| anyhow!("UpdateFunctionConfiguration failed: {e}"))?;
    Ok(())
}

async fn update_code(client: &LambdaClient, desired: &DesiredFunction) -> Result<()> {
    client
        .update_function_code()
        .function_name(&desired.function_name)
        .image_uri(&desired.image_uri)
        .publish(false)
        .send()
        .await
        .map_err(|e| anyhow!("UpdateFunctionCode failed: {e}"))?;
    Ok(())
}

async fn publish(client: &LambdaClient, desired: &DesiredFunction) -> Result<String> {
    let code_sha256 = desired
        .image_uri
        .rsplit_once("@sha256:")
        .map(|(_, hex)| hex.to_string());
    let mut request = client.publish_version().function_name(&desired.function_name);
    if let Some(code_sha256) = code_sha256 {
        request = request.code_sha256(code_sha256);
    }
    let output = request.send().await.map_err(|e| anyhow!("PublishVersion failed: {e}"))?;
    output
        .version()
        .map(|v| v.to_string())
        .ok_or_else(|| anyhow!("PublishVersion response missing Version"))
}

async fn wait_for_active(client: &LambdaClient, function_name: &str, retries: u32) -> Result<()> {
    for attempt in 0..retries {
        let output = client
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| anyhow!("GetFunctionConfiguration failed: {e}"))?;
        let last_update_successful = matches!(
            output.last_update_status(),
            Some(aws_sdk_lambda::types::LastUpdateStatus::Successful)
        );
        let active = matches!(output.state(), Some(aws_sdk_lambda::types::State::Active));
        if last_update_successful && active {
            return Ok(());
        }
        log::debug!("function {function_name} not yet active, retry {attempt}/{retries}");
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
    Err(anyhow!("function {function_name} did not become active after {retries} retries"))
}

/// Existing keys are preserved; desired keys overwrite unless the desired value
/// fails the environment value regex, in which case the key is dropped.
fn merge_environment(
    existing: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    for (key, value) in desired {
        if is_valid_env_value(value) {
            merged.insert(key.clone(), value.clone());
        } else {
            merged.remove(key);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_existing_and_desired_environment() {
        let mut existing = BTreeMap::new();
        existing.insert("KEEP".to_string(), "old".to_string());
        existing.insert("OVERWRITE".to_string(), "old".to_string());
        let mut desired = BTreeMap::new();
        desired.insert("OVERWRITE".to_string(), "new".to_string());
        desired.insert("BAD".to_string(), "bad\"value".to_string());

        let merged = merge_environment(&existing, &desired);
        assert_eq!(merged.get("KEEP"), Some(&"old".to_string()));
        assert_eq!(merged.get("OVERWRITE"), Some(&"new".to_string()));
        assert!(!merged.contains_key("BAD"));
    }

}
