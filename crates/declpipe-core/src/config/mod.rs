//! Tool configuration.
//!
//! Two optional layers, both TOML:
//! - User: `<config_dir>/declpipe/config.toml`
//! - Project: `declpipe.toml` in the working directory
//!
//! The project layer is merged over the user layer key by key, then the
//! result is deserialized with defaults for anything left unset.

pub mod merge;
pub mod parser;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::manifest::DEFAULT_MAX_ATTEMPTS;

pub use merge::overlay;
pub use parser::{parse_config_layer, parse_config_str, to_toml};
pub use store::ConfigStore;

pub const PROJECT_CONFIG_FILE: &str = "declpipe.toml";
pub const USER_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeclpipeConfig {
    pub manifest: ManifestConfig,
    pub ancestry: AncestryConfig,
    pub files: FilesConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestConfig {
    /// Bound on compare-and-swap attempts when publishing a version.
    pub max_attempts: u32,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AncestryConfig {
    /// Environments where a remote version unknown to local history is
    /// tolerated with a warning.
    pub relaxed_environments: Vec<String>,
}

impl Default for AncestryConfig {
    fn default() -> Self {
        Self {
            relaxed_environments: vec!["dev".to_string()],
        }
    }
}

/// Local file layout, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    pub pipeline: String,
    pub dag: String,
    pub jobs_dir: String,
    pub requirements: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            pipeline: "orchestration-pipeline.yaml".to_string(),
            dag: "orchestration-pipeline.py".to_string(),
            jobs_dir: "jobs".to_string(),
            requirements: "jobs/requirements.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Substrings of paths that never count as uncommitted changes.
    pub ignored_dirty_patterns: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            ignored_dirty_patterns: vec![
                ".pyc".to_string(),
                "__pycache__".to_string(),
                ".declpipe".to_string(),
            ],
        }
    }
}

impl GitConfig {
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_dirty_patterns
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }
}

impl DeclpipeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.manifest.max_attempts == 0 {
            anyhow::bail!("manifest.max_attempts must be at least 1");
        }
        for (key, value) in [
            ("files.pipeline", &self.files.pipeline),
            ("files.dag", &self.files.dag),
            ("files.jobs_dir", &self.files.jobs_dir),
            ("files.requirements", &self.files.requirements),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{key} must not be empty");
            }
        }
        Ok(())
    }
}
