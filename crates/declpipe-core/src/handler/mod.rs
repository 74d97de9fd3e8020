//! Per-kind resource handlers.
//!
//! A handler knows how to find, diff, create and update one declared cloud
//! resource. It is built from the declaration and its environment only;
//! every remote call goes through the [`ResourceClient`] passed in.

pub mod dataform;
pub mod dataproc;
pub mod registry;
pub mod transfer;

use serde_json::Value;

use crate::error::{DeployError, ProviderError, Result};
use crate::model::{Definition, ResourceDeclaration};
use crate::provider::{ApiEndpoint, ApiMethod, ProviderRequest, ResourceClient};

pub use dataform::{DataformHandler, DataformKind};
pub use dataproc::DataprocClusterHandler;
pub use registry::HandlerRegistry;
pub use transfer::TransferConfigHandler;

/// How a handler locates the remote counterpart of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Direct get on the full resource name.
    ByName,
    /// List the collection and match on `displayName`.
    ByDisplayName,
}

/// Field casing the provider expects in `updateMask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskCasing {
    Camel,
    Snake,
}

/// What a provider supports, fixed per API version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub endpoint: ApiEndpoint,
    pub lookup: LookupStrategy,
    /// Create and update return operations that must be polled.
    pub long_running: bool,
    /// Create and update accept a `serviceAccountName` parameter.
    pub service_account_param: bool,
    pub mask_casing: MaskCasing,
}

impl ProviderCapabilities {
    /// Reject declarations that use fields this provider does not have.
    pub fn validate(&self, decl: &ResourceDeclaration) -> Result<()> {
        if self.lookup == LookupStrategy::ByDisplayName
            && decl.display_name.as_deref().is_none_or(str::is_empty)
        {
            return Err(DeployError::Config(format!(
                "{} '{}' requires displayName",
                decl.kind, decl.name
            )));
        }
        if decl.service_account_name.is_some() && !self.service_account_param {
            return Err(DeployError::Config(format!(
                "{} '{}' does not support serviceAccountName",
                decl.kind, decl.name
            )));
        }
        Ok(())
    }

    /// Render changed fields as an update mask in the provider's casing.
    pub fn mask(&self, changed_fields: &[String]) -> String {
        changed_fields
            .iter()
            .map(|field| match self.mask_casing {
                MaskCasing::Camel => field.clone(),
                MaskCasing::Snake => snake_case_path(field),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Strategy for reconciling one declared resource.
pub trait ResourceHandler {
    /// The declaration's `type` string.
    fn kind(&self) -> &str;

    fn capabilities(&self) -> &ProviderCapabilities;

    /// Stable identifier used for idempotent lookup.
    fn get_resource_id(&self) -> String;

    fn find_existing_resource(&self, client: &dyn ResourceClient) -> Result<Option<Value>>;

    fn get_local_definition(&self) -> Definition;

    /// Field names whose declared value differs from the remote one.
    fn compare(&self, existing: &Value, local: &Definition) -> Vec<String> {
        shallow_compare(existing, local)
    }

    fn build_create_request(&self, definition: &Definition) -> Result<ProviderRequest>;

    /// Build a patch limited to `changed_fields`.
    fn build_update_request(
        &self,
        existing: &Value,
        definition: &Definition,
        changed_fields: &[String],
    ) -> Result<ProviderRequest>;

    fn get_create_method(&self) -> ApiMethod;

    fn get_update_method(&self) -> ApiMethod;

    /// Resolve a create/update response to the final resource and a name to
    /// report. Handlers whose provider returns operations poll here.
    fn wait_for_operation(
        &self,
        _client: &dyn ResourceClient,
        response: Value,
    ) -> Result<(Value, String)> {
        let name = response
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.get_resource_id());
        Ok((response, name))
    }
}

/// Keys of `local` whose value is not equal to the same key of `existing`.
/// A missing remote field equals a declared `null`.
pub fn shallow_compare(existing: &Value, local: &Definition) -> Vec<String> {
    local
        .iter()
        .filter(|(key, value)| existing.get(key.as_str()).unwrap_or(&Value::Null) != *value)
        .map(|(key, _)| key.clone())
        .collect()
}

/// The `name` of a remote resource.
pub fn remote_name(existing: &Value) -> Result<String> {
    existing
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::Malformed("remote resource has no name".to_string()).into()
        })
}

/// Patch body: the declared fields plus the remote name.
pub fn patch_body(existing_name: &str, definition: &Definition) -> Value {
    let mut body = definition.clone();
    body.insert("name".to_string(), Value::String(existing_name.to_string()));
    Value::Object(body)
}

/// `config.workerConfig.numInstances` -> `config.worker_config.num_instances`
pub fn snake_case_path(path: &str) -> String {
    path.split('.')
        .map(snake_case)
        .collect::<Vec<_>>()
        .join(".")
}

fn snake_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    let chars: Vec<char> = segment.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}
