//! Dataform repositories, release configs and workflow configs.

use serde_json::Value;

use crate::error::{DeployError, Result};
use crate::model::{
    DATAFORM_RELEASE_CONFIG, DATAFORM_REPOSITORY, DATAFORM_WORKFLOW_CONFIG, Definition,
    EnvironmentModel, ResourceDeclaration,
};
use crate::provider::{ApiEndpoint, ApiMethod, HttpVerb, ProviderRequest, ResourceClient};

use super::{
    LookupStrategy, MaskCasing, ProviderCapabilities, ResourceHandler, patch_body, remote_name,
};

const DATAFORM: ApiEndpoint = ApiEndpoint::new("dataform", "v1beta1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataformKind {
    Repository,
    ReleaseConfig,
    WorkflowConfig,
}

impl DataformKind {
    fn type_name(self) -> &'static str {
        match self {
            DataformKind::Repository => DATAFORM_REPOSITORY,
            DataformKind::ReleaseConfig => DATAFORM_RELEASE_CONFIG,
            DataformKind::WorkflowConfig => DATAFORM_WORKFLOW_CONFIG,
        }
    }

    fn collection(self) -> &'static str {
        match self {
            DataformKind::Repository => "repositories",
            DataformKind::ReleaseConfig => "releaseConfigs",
            DataformKind::WorkflowConfig => "workflowConfigs",
        }
    }

    fn id_param(self) -> &'static str {
        match self {
            DataformKind::Repository => "repositoryId",
            DataformKind::ReleaseConfig => "releaseConfigId",
            DataformKind::WorkflowConfig => "workflowConfigId",
        }
    }

    fn methods(self) -> (&'static str, &'static str) {
        match self {
            DataformKind::Repository => (
                "projects.locations.repositories.create",
                "projects.locations.repositories.patch",
            ),
            DataformKind::ReleaseConfig => (
                "projects.locations.repositories.releaseConfigs.create",
                "projects.locations.repositories.releaseConfigs.patch",
            ),
            DataformKind::WorkflowConfig => (
                "projects.locations.repositories.workflowConfigs.create",
                "projects.locations.repositories.workflowConfigs.patch",
            ),
        }
    }
}

pub struct DataformHandler {
    kind: DataformKind,
    name: String,
    definition: Definition,
    /// Collection parent: the location for repositories, the repository
    /// otherwise.
    parent: String,
    repository_path: Option<String>,
    capabilities: ProviderCapabilities,
}

impl DataformHandler {
    pub fn new(
        kind: DataformKind,
        decl: &ResourceDeclaration,
        env: &EnvironmentModel,
    ) -> Result<Self> {
        let capabilities = ProviderCapabilities {
            endpoint: DATAFORM,
            lookup: LookupStrategy::ByName,
            long_running: false,
            service_account_param: false,
            mask_casing: MaskCasing::Camel,
        };
        capabilities.validate(decl)?;

        let (parent, repository_path) = match kind {
            DataformKind::Repository => (env.location_path(), None),
            DataformKind::ReleaseConfig | DataformKind::WorkflowConfig => {
                let repository = decl
                    .repository_name
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        DeployError::Config(format!(
                            "{} '{}' requires repositoryName",
                            decl.kind, decl.name
                        ))
                    })?;
                let path = format!("{}/repositories/{repository}", env.location_path());
                (path.clone(), Some(path))
            }
        };

        Ok(Self {
            kind,
            name: decl.name.clone(),
            definition: decl.definition(),
            parent,
            repository_path,
            capabilities,
        })
    }

    pub fn repository(decl: &ResourceDeclaration, env: &EnvironmentModel) -> Result<Self> {
        Self::new(DataformKind::Repository, decl, env)
    }

    pub fn release_config(decl: &ResourceDeclaration, env: &EnvironmentModel) -> Result<Self> {
        Self::new(DataformKind::ReleaseConfig, decl, env)
    }

    pub fn workflow_config(decl: &ResourceDeclaration, env: &EnvironmentModel) -> Result<Self> {
        Self::new(DataformKind::WorkflowConfig, decl, env)
    }

    fn collection_path(&self) -> String {
        format!("{}/{}", self.parent, self.kind.collection())
    }

    /// Full resource name of the declared resource.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }
}

impl ResourceHandler for DataformHandler {
    fn kind(&self) -> &str {
        self.kind.type_name()
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
        let mut definition = self.definition.clone();
        if self.kind == DataformKind::WorkflowConfig
            && let Some(repository) = &self.repository_path
            && let Some(Value::String(release)) = definition.get("releaseConfig")
            && !release.contains('/')
        {
            let qualified = format!("{repository}/releaseConfigs/{release}");
            definition.insert("releaseConfig".to_string(), Value::String(qualified));
        }
        definition
    }

    fn build_create_request(&self, definition: &Definition) -> Result<ProviderRequest> {
        Ok(
            ProviderRequest::new(self.collection_path(), Value::Object(definition.clone()))
                .query(self.kind.id_param(), self.name.as_str()),
        )
    }

    fn build_update_request(
        &self,
        existing: &Value,
        definition: &Definition,
        changed_fields: &[String],
    ) -> Result<ProviderRequest> {
        let name = remote_name(existing)?;
        Ok(ProviderRequest::new(name.clone(), patch_body(&name, definition))
            .query("updateMask", self.capabilities.mask(changed_fields)))
    }

    fn get_create_method(&self) -> ApiMethod {
        ApiMethod::new(DATAFORM, HttpVerb::Post, self.kind.methods().0)
    }

    fn get_update_method(&self) -> ApiMethod {
        ApiMethod::new(DATAFORM, HttpVerb::Patch, self.kind.methods().1)
    }

    fn wait_for_operation(
        &self,
        _client: &dyn ResourceClient,
        response: Value,
    ) -> Result<(Value, String)> {
        Ok((response, self.name.clone()))
    }
}
