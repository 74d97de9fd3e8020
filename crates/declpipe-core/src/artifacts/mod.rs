//! Version-scoped artifacts.
//!
//! Every local file an action references is rewritten to
//! `<base uri><relative path>`, where the base uri embeds the version id, so
//! versions never share or overwrite each other's files.

pub mod bundle;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{DeployError, Result};
use crate::exec::CommandRunner;
use crate::pipeline::ResolvedPipeline;
use crate::storage::ObjectStore;

pub use bundle::{Bundle, DependencyBundler};

/// Where bundles are staged, relative to the working directory.
pub const BUNDLE_DIR: &str = ".declpipe/bundles";

/// Local inputs of the artifact pipeline.
#[derive(Debug, Clone)]
pub struct ArtifactSources {
    pub work_dir: PathBuf,
    /// Directory uploaded as a whole, relative to `work_dir`.
    pub jobs_dir: String,
    /// Requirements file, relative to `work_dir`.
    pub requirements: String,
}

/// Result of processing a pipeline's actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedArtifacts {
    pub base_uri: String,
    pub bundles: Vec<Bundle>,
    /// Referenced files outside the jobs directory, relative to `work_dir`.
    pub loose_files: Vec<String>,
}

pub struct ArtifactPipeline<'a> {
    sources: &'a ArtifactSources,
    runner: &'a dyn CommandRunner,
    base_uri: String,
}

impl<'a> ArtifactPipeline<'a> {
    pub fn new(sources: &'a ArtifactSources, runner: &'a dyn CommandRunner, base_uri: impl Into<String>) -> Self {
        let mut base_uri = base_uri.into();
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }
        Self {
            sources,
            runner,
            base_uri,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Rewrite local references in every action and build dependency bundles.
    pub fn process(&self, pipeline: &mut ResolvedPipeline) -> Result<PreparedArtifacts> {
        let defaults = pipeline.defaults();
        let requirements = self.sources.work_dir.join(&self.sources.requirements);
        let bundler = DependencyBundler::new(
            self.runner,
            requirements.clone(),
            self.sources.work_dir.join(BUNDLE_DIR),
        );

        let mut bundles: BTreeMap<String, Bundle> = BTreeMap::new();
        let mut loose_files = Vec::new();

        for action in pipeline.actions_mut().into_iter().flatten() {
            let Some(action) = action.as_object_mut() else {
                continue;
            };

            if requirements.exists()
                && let Some(version) = python_version(action, &defaults)
            {
                let bundle = match bundles.get(&version) {
                    Some(bundle) => bundle.clone(),
                    None => {
                        let built = bundler.build(&version)?;
                        bundles.insert(version.clone(), built.clone());
                        built
                    }
                };
                action.insert("pythonPath".to_string(), Value::String(bundle.python_path.clone()));
                action.insert(
                    "environmentArchive".to_string(),
                    Value::String(format!("{}{}", self.base_uri, bundle.archive_name())),
                );
            }

            if let Some(relative) = self.rewrite_filename(action)?
                && !self.in_jobs_dir(&relative)
                && !loose_files.contains(&relative)
            {
                loose_files.push(relative);
            }
        }

        Ok(PreparedArtifacts {
            base_uri: self.base_uri.clone(),
            bundles: bundles.into_values().collect(),
            loose_files,
        })
    }

    /// Replace a local `filename` with its remote uri. Returns the relative path.
    fn rewrite_filename(&self, action: &mut Map<String, Value>) -> Result<Option<String>> {
        let Some(Value::String(raw)) = action.get("filename") else {
            return Ok(None);
        };
        let relative = raw.trim_start_matches('/').replace('\\', "/");
        self.check_local(&relative)?;
        action.insert(
            "filename".to_string(),
            Value::String(format!("{}{relative}", self.base_uri)),
        );
        Ok(Some(relative))
    }

    /// The file must exist and resolve to a path under the working directory.
    fn check_local(&self, relative: &str) -> Result<()> {
        let escapes = Path::new(relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(DeployError::BadFile(format!(
                "file referenced in pipeline is outside the working directory: {relative}"
            )));
        }

        let path = self.sources.work_dir.join(relative);
        if !path.exists() {
            return Err(DeployError::BadFile(format!(
                "file referenced in pipeline does not exist locally: {relative}"
            )));
        }

        // Symlinks may still point elsewhere.
        let canonical = |p: &Path| {
            p.canonicalize().map_err(|e| {
                DeployError::BadFile(format!("cannot resolve {}: {e}", p.display()))
            })
        };
        if !canonical(&path)?.starts_with(canonical(&self.sources.work_dir)?) {
            return Err(DeployError::BadFile(format!(
                "file referenced in pipeline is outside the working directory: {relative}"
            )));
        }
        Ok(())
    }

    fn in_jobs_dir(&self, relative: &str) -> bool {
        let jobs = self.sources.jobs_dir.trim_matches('/');
        Path::new(relative).starts_with(jobs)
    }

    /// Upload bundles, the jobs directory and any loose files.
    pub fn upload(&self, store: &dyn ObjectStore, prepared: &PreparedArtifacts) -> Result<Vec<String>> {
        let mut uploaded = Vec::new();

        for bundle in &prepared.bundles {
            let dest = format!("{}{}", self.base_uri, bundle.archive_name());
            store.upload_file(&bundle.archive, &dest)?;
            uploaded.push(dest);
        }

        let jobs_dir = self.sources.work_dir.join(&self.sources.jobs_dir);
        if jobs_dir.is_dir() {
            let dest = format!("{}{}/", self.base_uri, self.sources.jobs_dir.trim_matches('/'));
            store.upload_dir(&jobs_dir, &dest)?;
            uploaded.push(dest);
        }

        for relative in &prepared.loose_files {
            let dest = format!("{}{relative}", self.base_uri);
            store.upload_file(&self.sources.work_dir.join(relative), &dest)?;
            uploaded.push(dest);
        }

        for dest in &uploaded {
            tracing::info!(path = %dest, "uploaded artifact");
        }
        Ok(uploaded)
    }
}

/// Runtime version for python actions: the action's own `pythonVersion`,
/// then `config.pythonVersion`, then the pipeline defaults.
fn python_version(action: &Map<String, Value>, defaults: &Map<String, Value>) -> Option<String> {
    let is_python = action
        .get("filename")
        .and_then(Value::as_str)
        .is_some_and(|f| f.ends_with(".py"));
    if !is_python {
        return None;
    }
    action
        .get("pythonVersion")
        .or_else(|| action.get("config").and_then(|c| c.get("pythonVersion")))
        .or_else(|| defaults.get("pythonVersion"))
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
