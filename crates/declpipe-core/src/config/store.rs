//! Config store for loading the user and project layers.

use std::path::{Path, PathBuf};

use toml::Table;

use super::{DeclpipeConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE, merge, parser};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    user_path: Option<PathBuf>,
    project_path: PathBuf,
}

impl ConfigStore {
    /// Store for a working directory, with the user layer under the
    /// platform config directory when one exists.
    pub fn for_work_dir(work_dir: &Path) -> Self {
        let user_dir = dirs::config_dir().map(|dir| dir.join("declpipe"));
        Self::from_paths(user_dir, work_dir)
    }

    pub fn from_paths(user_dir: Option<PathBuf>, work_dir: &Path) -> Self {
        Self {
            user_path: user_dir.map(|dir| dir.join(USER_CONFIG_FILE)),
            project_path: work_dir.join(PROJECT_CONFIG_FILE),
        }
    }

    pub fn user_path(&self) -> Option<&Path> {
        self.user_path.as_deref()
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Load both layers. Missing files contribute nothing.
    pub fn load(&self) -> anyhow::Result<DeclpipeConfig> {
        let mut merged = Table::new();
        for path in self.user_path.iter().chain(std::iter::once(&self.project_path)) {
            if !path.exists() {
                continue;
            }
            tracing::debug!(path = %path.display(), "loading config layer");
            merge::overlay(&mut merged, parser::parse_config_layer(path)?);
        }
        parser::from_table(merged)
    }
}
