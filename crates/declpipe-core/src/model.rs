//! Parsed deployment file.
//!
//! ```yaml
//! environments:
//!   dev:
//!     project: my-project
//!     region: us-central1
//!     composer_environment: orchestrator
//!     artifact_storage: { bucket: artifacts, path_prefix: pipelines/daily }
//!     variables: { dataset: staging }
//!     resources:
//!       - type: dataform.repository
//!         name: repo-a
//! ```
//!
//! Resource `type` strings are kept as written. Whether a type is supported is
//! decided when the resource is dispatched to a handler, not here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{DeployError, Result};

pub const RESOURCE_PROFILE: &str = "resourceProfile";
pub const DATAPROC_CLUSTER: &str = "dataproc.cluster";
pub const TRANSFER_CONFIG: &str = "bigquery.datatransfer.config";
pub const DATAFORM_REPOSITORY: &str = "dataform.repository";
pub const DATAFORM_RELEASE_CONFIG: &str = "dataform.repository.releaseConfig";
pub const DATAFORM_WORKFLOW_CONFIG: &str = "dataform.repository.workflowConfig";

/// Provider-specific fields of a declared resource, in provider casing.
pub type Definition = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// Resource profiles only.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub definition: Option<Definition>,
}

impl ResourceDeclaration {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            display_name: None,
            repository_name: None,
            service_account_name: None,
            source: None,
            definition: None,
        }
    }

    pub fn with_definition(mut self, definition: Value) -> Self {
        if let Value::Object(map) = definition {
            self.definition = Some(map);
        }
        self
    }

    pub fn is_profile(&self) -> bool {
        self.kind == RESOURCE_PROFILE
    }

    /// Declared definition, or an empty mapping.
    pub fn definition(&self) -> Definition {
        self.definition.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactStorage {
    pub bucket: String,
    pub path_prefix: String,
}

impl ArtifactStorage {
    /// `gs://<bucket>/<path_prefix>/versions/<version>/`
    pub fn version_base_uri(&self, version: &str) -> String {
        let prefix = self.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("gs://{}/versions/{version}/", self.bucket)
        } else {
            format!("gs://{}/{prefix}/versions/{version}/", self.bucket)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvironmentModel {
    pub project: String,
    pub region: String,
    #[serde(default)]
    pub composer_environment: Option<String>,
    #[serde(default)]
    pub artifact_storage: Option<ArtifactStorage>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub resources: Vec<ResourceDeclaration>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl EnvironmentModel {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            composer_environment: None,
            artifact_storage: None,
            resources: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    /// `projects/<project>/locations/<region>`
    pub fn location_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Box<ResourceDeclaration>),
    Many(Vec<ResourceDeclaration>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<ResourceDeclaration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(one)) => vec![*one],
        Some(OneOrMany::Many(many)) => many,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DeploymentModel {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentModel>,
}

impl DeploymentModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::BadFile(format!(
                "deployment file not found or unreadable: {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&file_label(path), &content)
    }

    pub fn from_yaml_str(file: &str, content: &str) -> Result<Self> {
        let model: Option<DeploymentModel> = serde_yaml::from_str(content)
            .map_err(|e| DeployError::Config(format!("failed to parse {file}: {e}")))?;
        Ok(model.unwrap_or_default())
    }

    pub fn environment(&self, env: &str, file: &str) -> Result<&EnvironmentModel> {
        self.environments
            .get(env)
            .ok_or_else(|| DeployError::EnvironmentNotFound {
                env: env.to_string(),
                file: file.to_string(),
            })
    }
}

/// File name used when reporting errors about a deployment file.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
