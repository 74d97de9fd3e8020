//! Dataproc clusters.

use std::time::Duration;

use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::model::{DATAPROC_CLUSTER, Definition, EnvironmentModel, ResourceDeclaration};
use crate::provider::{ApiEndpoint, ApiMethod, HttpVerb, ProviderRequest, ResourceClient};

use super::{LookupStrategy, MaskCasing, ProviderCapabilities, ResourceHandler};

const DATAPROC: ApiEndpoint = ApiEndpoint::new("dataproc", "v1");
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maps updated as a whole rather than per key.
const OPAQUE_MAPS: &[&str] = &["labels"];

pub struct DataprocClusterHandler {
    name: String,
    project: String,
    region: String,
    definition: Definition,
    poll_interval: Duration,
    capabilities: ProviderCapabilities,
}

impl DataprocClusterHandler {
    pub fn new(decl: &ResourceDeclaration, env: &EnvironmentModel) -> Result<Self> {
        let capabilities = ProviderCapabilities {
            endpoint: DATAPROC,
            lookup: LookupStrategy::ByName,
            long_running: true,
            service_account_param: false,
            mask_casing: MaskCasing::Snake,
        };
        capabilities.validate(decl)?;

        Ok(Self {
            name: decl.name.clone(),
            project: env.project.clone(),
            region: env.region.clone(),
            definition: decl.definition(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            capabilities,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn collection_path(&self) -> String {
        format!("projects/{}/regions/{}/clusters", self.project, self.region)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    fn body(&self, definition: &Definition) -> Value {
        let mut body = definition.clone();
        body.insert("clusterName".to_string(), Value::String(self.name.clone()));
        body.insert("projectId".to_string(), Value::String(self.project.clone()));
        Value::Object(body)
    }
}

/// Dotted paths of every declared leaf that differs from the remote value.
fn diff_paths(prefix: &str, existing: &Value, local: &Definition, out: &mut Vec<String>) {
    for (key, declared) in local {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let remote = existing.get(key.as_str()).unwrap_or(&Value::Null);
        match declared {
            Value::Object(nested) if !OPAQUE_MAPS.contains(&key.as_str()) && remote.is_object() => {
                diff_paths(&path, remote, nested, out);
            }
            _ if remote != declared => out.push(path),
            _ => {}
        }
    }
}

fn is_operation(response: &Value) -> bool {
    response.get("done").is_some()
        || response
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| n.contains("/operations/"))
}

impl ResourceHandler for DataprocClusterHandler {
    fn kind(&self) -> &str {
        DATAPROC_CLUSTER
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn get_resource_id(&self) -> String {
        self.name.clone()
    }

    fn find_existing_resource(&self, client: &dyn ResourceClient) -> Result<Option<Value>> {
        Ok(client.get(self.capabilities.endpoint, &self.full_name())?)
    }

    fn get_local_definition(&self) -> Definition {
        self.definition.clone()
    }

    fn compare(&self, existing: &Value, local: &Definition) -> Vec<String> {
        let mut changed = Vec::new();
        diff_paths("", existing, local, &mut changed);
        changed
    }

    fn build_create_request(&self, definition: &Definition) -> Result<ProviderRequest> {
        Ok(ProviderRequest::new(self.collection_path(), self.body(definition)))
    }

    fn build_update_request(
        &self,
        _existing: &Value,
        definition: &Definition,
        changed_fields: &[String],
    ) -> Result<ProviderRequest> {
        Ok(ProviderRequest::new(self.full_name(), self.body(definition))
            .query("updateMask", self.capabilities.mask(changed_fields)))
    }

    fn get_create_method(&self) -> ApiMethod {
        ApiMethod::new(DATAPROC, HttpVerb::Post, "projects.regions.clusters.create")
    }

    fn get_update_method(&self) -> ApiMethod {
        ApiMethod::new(DATAPROC, HttpVerb::Patch, "projects.regions.clusters.patch")
    }

    fn wait_for_operation(
        &self,
        client: &dyn ResourceClient,
        response: Value,
    ) -> Result<(Value, String)> {
        if !is_operation(&response) {
            return Ok((response, self.name.clone()));
        }

        let op_name = response
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut operation = response;
        loop {
            if operation.get("done").and_then(Value::as_bool) == Some(true) {
                break;
            }
            if op_name.is_empty() {
                return Err(ProviderError::Malformed(
                    "pending operation has no name".to_string(),
                )
                .into());
            }
            tracing::debug!(operation = %op_name, "waiting for operation");
            std::thread::sleep(self.poll_interval);
            operation = client
                .get(self.capabilities.endpoint, &op_name)?
                .ok_or_else(|| ProviderError::NotFound(op_name.clone()))?;
        }

        if let Some(error) = operation.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::Operation {
                name: op_name,
                message,
            }
            .into());
        }

        let cluster = match operation.get("response") {
            Some(result) => result.clone(),
            None => client
                .get(self.capabilities.endpoint, &self.full_name())?
                .unwrap_or(Value::Null),
        };
        Ok((cluster, self.name.clone()))
    }
}
