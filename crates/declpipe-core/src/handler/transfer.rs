//! BigQuery Data Transfer configs.
//!
//! Transfer configs get server-assigned names, so the declaration is matched
//! against existing configs by `displayName`.

use serde_json::Value;

use crate::error::{DeployError, Result};
use crate::model::{Definition, EnvironmentModel, ResourceDeclaration, TRANSFER_CONFIG};
use crate::provider::{ApiEndpoint, ApiMethod, HttpVerb, ProviderRequest, ResourceClient};

use super::{
    LookupStrategy, MaskCasing, ProviderCapabilities, ResourceHandler, patch_body, remote_name,
};

const DATA_TRANSFER: ApiEndpoint = ApiEndpoint::new("bigquerydatatransfer", "v1");

const SERVICE_ACCOUNT_FIELDS: &[&str] = &["serviceAccountName", "service_account_name"];

pub struct TransferConfigHandler {
    name: String,
    display_name: String,
    service_account_name: Option<String>,
    definition: Definition,
    location: String,
    capabilities: ProviderCapabilities,
}

impl TransferConfigHandler {
    pub fn new(decl: &ResourceDeclaration, env: &EnvironmentModel) -> Result<Self> {
        let capabilities = ProviderCapabilities {
            endpoint: DATA_TRANSFER,
            lookup: LookupStrategy::ByDisplayName,
            long_running: false,
            service_account_param: true,
            mask_casing: MaskCasing::Camel,
        };
        capabilities.validate(decl)?;

        Ok(Self {
            name: decl.name.clone(),
            display_name: decl.display_name.clone().unwrap_or_default(),
            service_account_name: decl.service_account_name.clone(),
            definition: decl.definition(),
            location: env.location_path(),
            capabilities,
        })
    }

    fn collection_path(&self) -> String {
        format!("{}/transferConfigs", self.location)
    }
}

/// Transfer params may come back as a JSON-encoded string.
fn decoded_params(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(encoded)) => {
            serde_json::from_str(encoded).unwrap_or_else(|_| Value::String(encoded.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

impl ResourceHandler for TransferConfigHandler {
    fn kind(&self) -> &str {
        TRANSFER_CONFIG
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn get_resource_id(&self) -> String {
        self.name.clone()
    }

    fn find_existing_resource(&self, client: &dyn ResourceClient) -> Result<Option<Value>> {
        let configs = client.list(
            self.capabilities.endpoint,
            &self.collection_path(),
            "transferConfigs",
        )?;
        let matching: Vec<&Value> = configs
            .iter()
            .filter(|c| c.get("displayName").and_then(Value::as_str) == Some(self.display_name.as_str()))
            .collect();

        match matching.as_slice() {
            [] => Ok(None),
            [only] => {
                let name = remote_name(only)?;
                tracing::debug!(resource = %name, "found matching transfer config");
                Ok(client.get(self.capabilities.endpoint, &name)?)
            }
            many => Err(DeployError::AmbiguousResource {
                kind: TRANSFER_CONFIG.to_string(),
                identifier: self.display_name.clone(),
                count: many.len(),
            }),
        }
    }

    fn get_local_definition(&self) -> Definition {
        let mut definition = self.definition.clone();
        definition.insert(
            "displayName".to_string(),
            Value::String(self.display_name.clone()),
        );
        definition
    }

    fn compare(&self, existing: &Value, local: &Definition) -> Vec<String> {
        local
            .iter()
            .filter(|(key, _)| !SERVICE_ACCOUNT_FIELDS.contains(&key.as_str()))
            .filter(|(key, value)| {
                if key.as_str() == "params" {
                    decoded_params(existing.get("params")) != decoded_params(Some(*value))
                } else {
                    existing.get(key.as_str()).unwrap_or(&Value::Null) != *value
                }
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn build_create_request(&self, definition: &Definition) -> Result<ProviderRequest> {
        let mut body = definition.clone();
        for field in SERVICE_ACCOUNT_FIELDS {
            body.remove(*field);
        }
        Ok(
            ProviderRequest::new(self.collection_path(), Value::Object(body))
                .query_opt("serviceAccountName", self.service_account_name.as_deref()),
        )
    }

    fn build_update_request(
        &self,
        existing: &Value,
        definition: &Definition,
        changed_fields: &[String],
    ) -> Result<ProviderRequest> {
        let name = remote_name(existing)?;
        let mask: Vec<String> = changed_fields
            .iter()
            .filter(|f| !SERVICE_ACCOUNT_FIELDS.contains(&f.as_str()))
            .cloned()
            .collect();

        let mut definition = definition.clone();
        for field in SERVICE_ACCOUNT_FIELDS {
            definition.remove(*field);
        }
        Ok(ProviderRequest::new(name.clone(), patch_body(&name, &definition))
            .query("updateMask", self.capabilities.mask(&mask))
            .query_opt("serviceAccountName", self.service_account_name.as_deref()))
    }

    fn get_create_method(&self) -> ApiMethod {
        ApiMethod::new(
            DATA_TRANSFER,
            HttpVerb::Post,
            "projects.locations.transferConfigs.create",
        )
    }

    fn get_update_method(&self) -> ApiMethod {
        ApiMethod::new(
            DATA_TRANSFER,
            HttpVerb::Patch,
            "projects.locations.transferConfigs.patch",
        )
    }
}
