//! Deploy command implementation.
//!
//! Reconciles an environment's declared resources, then publishes the
//! orchestration pipeline: version-scoped artifacts first, the manifest last.
//! Artifacts are uploaded before the manifest moves, so a failed publish
//! leaves the previous default version fully intact.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::artifacts::{ArtifactPipeline, ArtifactSources};
use crate::context::DeployContext;
use crate::deploy::{EnvironmentDeployer, EnvironmentReport};
use crate::error::{DeployError, Result};
use crate::exec::{Invocation, check_output};
use crate::manifest::{ManifestPublisher, PublishReport, PublishRequest, manifest_uri};
use crate::model::{DeploymentModel, EnvironmentModel, file_label};
use crate::pipeline::ResolvedPipeline;
use crate::storage::WritePrecondition;
use crate::version::{Bypass, VersionId};

/// Default deployment file, relative to the working directory.
pub const DEFAULT_DEPLOYMENT_FILE: &str = "deployment.yaml";

/// Options for the deploy command
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Target environment name
    pub env: String,
    /// Deployment file, relative to the working directory unless absolute
    pub deployment_file: PathBuf,
    /// Report intended changes without applying them
    pub dry_run: bool,
    /// Check out and republish an earlier version
    pub rollback: bool,
    /// Explicit version id, required with `rollback`
    pub version: Option<String>,
    /// Deploy despite uncommitted changes and skip the ancestry check
    pub force: bool,
}

impl DeployOptions {
    pub fn new(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            deployment_file: PathBuf::from(DEFAULT_DEPLOYMENT_FILE),
            dry_run: false,
            rollback: false,
            version: None,
            force: false,
        }
    }

    pub fn with_deployment_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.deployment_file = path.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Success,
    Skipped,
    /// Computed during a dry run, nothing applied.
    Planned,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Success => "SUCCESS",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::Planned => "DRY RUN",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub pipeline_id: String,
    pub version: VersionId,
    pub artifact_base_uri: String,
    pub manifest_uri: String,
    pub uploaded: Vec<String>,
    /// Artifacts for this version were already present and left untouched.
    pub reused_artifacts: bool,
    /// Absent in a dry run.
    pub publish: Option<PublishReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub env: String,
    pub resource_status: StageStatus,
    pub resources: Option<EnvironmentReport>,
    pub pipeline_status: StageStatus,
    pub pipeline: Option<PipelineReport>,
    /// Uncommitted paths deployed anyway under `force`.
    pub forced_changes: Vec<String>,
}

impl DeployReport {
    /// One-line outcome suitable for the end of a deploy.
    pub fn summary(&self) -> String {
        if self.resource_status == StageStatus::Planned || self.pipeline_status == StageStatus::Planned {
            return "Dry run complete; no changes applied.".to_string();
        }
        let version = self.pipeline.as_ref().map(|p| p.version.as_str());
        match (self.resource_status, version) {
            (StageStatus::Success, Some(v)) => {
                format!("Resource and pipeline deployment successful for version {v}")
            }
            (_, Some(v)) => format!("Pipeline deployment successful for version {v}"),
            _ => "Resource deployment successful.".to_string(),
        }
    }
}

/// Asked to approve deploying with the listed uncommitted paths.
pub type ConfirmChanges<'a> = &'a dyn Fn(&[String]) -> bool;

/// Deploy command orchestrator
pub struct DeployCommand<'a> {
    ctx: &'a DeployContext,
}

impl<'a> DeployCommand<'a> {
    pub fn new(ctx: &'a DeployContext) -> Self {
        Self { ctx }
    }

    pub fn execute(&self, options: &DeployOptions, confirm: ConfirmChanges<'_>) -> Result<DeployReport> {
        if options.rollback && options.version.is_none() {
            return Err(DeployError::Config(
                "--rollback requires --version".to_string(),
            ));
        }

        let mut worktree = WorktreeCheck::default();

        if options.rollback
            && let Some(version) = &options.version
        {
            worktree.run(self.ctx, options, confirm)?;
            tracing::info!(version = %version, "checking out rollback version");
            self.ctx
                .history()
                .checkout(version, options.force)
                .map_err(|e| DeployError::Rollback {
                    version: version.clone(),
                    message: e.to_string(),
                })?;
        }

        let deployment_path = self.ctx.work_dir().join(&options.deployment_file);
        let file = file_label(&deployment_path);
        let model = DeploymentModel::load(&deployment_path)?;
        let env = model.environment(&options.env, &file)?;

        let declared = env.resources.iter().filter(|r| !r.is_profile()).count();
        let has_pipeline = env.composer_environment.is_some();
        if env.resources.is_empty() && !has_pipeline {
            return Err(DeployError::NothingToDeploy(format!(
                "environment '{}' in {file} declares no resources and no composer_environment",
                options.env
            )));
        }

        let mut report = DeployReport {
            env: options.env.clone(),
            resource_status: StageStatus::Skipped,
            resources: None,
            pipeline_status: StageStatus::Skipped,
            pipeline: None,
            forced_changes: Vec::new(),
        };

        if !env.resources.is_empty() {
            tracing::info!(env = %options.env, file = %file, resources = declared, "deploying resources");
            let deployer = EnvironmentDeployer::new(self.ctx.registry(), self.ctx.client(), options.dry_run);
            report.resources = Some(deployer.deploy(&options.env, &file, env)?);
            report.resource_status = if options.dry_run {
                StageStatus::Planned
            } else {
                StageStatus::Success
            };
        }

        if let Some(composer) = &env.composer_environment {
            worktree.run(self.ctx, options, confirm)?;
            let pipeline = self
                .deploy_pipeline(options, env, composer)
                .map_err(|e| e.in_pipeline(&options.env, &file))?;
            report.pipeline_status = if options.dry_run {
                StageStatus::Planned
            } else {
                StageStatus::Success
            };
            report.pipeline = Some(pipeline);
        } else {
            tracing::info!(env = %options.env, "no composer_environment, skipping pipeline deployment");
        }

        report.forced_changes = worktree.forced;
        Ok(report)
    }

    /// The id this deploy publishes.
    pub fn version_id(&self, options: &DeployOptions) -> Result<VersionId> {
        if let Some(version) = &options.version {
            return Ok(VersionId::new(version.clone()));
        }
        let head = self.ctx.history().current_version()?;
        if options.force {
            Ok(VersionId::forced(head.as_str(), self.ctx.now().timestamp()))
        } else {
            Ok(head)
        }
    }

    fn deploy_pipeline(
        &self,
        options: &DeployOptions,
        env: &EnvironmentModel,
        composer: &str,
    ) -> Result<PipelineReport> {
        let config = self.ctx.config();
        let version = self.version_id(options)?;

        let pipeline_path = self.ctx.resolve(&config.files.pipeline);
        let mut pipeline = ResolvedPipeline::load(&pipeline_path, &options.env, env)?;
        let pipeline_id = pipeline.pipeline_id()?.to_string();

        let storage = env.artifact_storage.as_ref().ok_or_else(|| {
            DeployError::Config(format!(
                "environment '{}' names a composer_environment but no artifact_storage",
                options.env
            ))
        })?;
        let base_uri = storage.version_base_uri(version.as_str());
        let bucket = self.orchestration_bucket(env, composer)?;
        let manifest = manifest_uri(&bucket, &pipeline_id);

        let mut report = PipelineReport {
            pipeline_id: pipeline_id.clone(),
            version: version.clone(),
            artifact_base_uri: base_uri.clone(),
            manifest_uri: manifest.clone(),
            uploaded: Vec::new(),
            reused_artifacts: false,
            publish: None,
        };

        if options.dry_run {
            tracing::info!(pipeline = %pipeline_id, version = %version, "dry run, pipeline not published");
            return Ok(report);
        }

        let store = self.ctx.store();
        report.reused_artifacts = options.rollback && !options.force && store.exists(&base_uri)?;

        if report.reused_artifacts {
            tracing::info!(path = %base_uri, "artifacts for version already uploaded, reusing them");
        } else {
            let sources = ArtifactSources {
                work_dir: self.ctx.work_dir().to_path_buf(),
                jobs_dir: config.files.jobs_dir.clone(),
                requirements: config.files.requirements.clone(),
            };
            let artifacts = ArtifactPipeline::new(&sources, self.ctx.runner(), base_uri.as_str());
            let prepared = artifacts.process(&mut pipeline)?;
            report.uploaded = artifacts.upload(store, &prepared)?;

            let definition_uri = format!(
                "gs://{bucket}/data/{pipeline_id}/versions/{version}/{}",
                file_name(&pipeline_path)
            );
            store.write(
                &definition_uri,
                pipeline.to_yaml()?.as_bytes(),
                WritePrecondition::None,
            )?;
            tracing::info!(path = %definition_uri, "uploaded pipeline definition");
            report.uploaded.push(definition_uri);
        }

        let validator = self.ctx.ancestry_validator();
        let publisher = ManifestPublisher::new(store, self.ctx.history(), &validator)
            .with_max_attempts(config.manifest.max_attempts)
            .with_clock(self.ctx.clock());
        report.publish = Some(publisher.publish(&PublishRequest {
            manifest_uri: &manifest,
            env: &options.env,
            version: &version,
            bypass: Bypass::from_flags(options.force, options.rollback),
        })?);

        // The DAG object is shared by every version, so it only moves once the
        // manifest does.
        let dag = self.ctx.resolve(&config.files.dag);
        if dag.is_file() {
            let dag_uri = format!("gs://{bucket}/dags/{}", file_name(&dag));
            store.upload_file(&dag, &dag_uri)?;
            tracing::info!(path = %dag_uri, "uploaded DAG");
            report.uploaded.push(dag_uri);
        }

        Ok(report)
    }

    /// Bucket behind the orchestration environment's DAG folder.
    fn orchestration_bucket(&self, env: &EnvironmentModel, composer: &str) -> Result<String> {
        let prefix = check_output(
            self.ctx.runner(),
            &Invocation::new("gcloud")
                .args(["composer", "environments", "describe", composer])
                .args(["--project", env.project.as_str()])
                .args(["--location", env.region.as_str()])
                .args(["--format", "value(config.dagGcsPrefix)"]),
        )?;
        bucket_from_prefix(&prefix).ok_or_else(|| {
            DeployError::Config(format!(
                "could not determine the bucket of composer environment '{composer}' from '{prefix}'"
            ))
        })
    }
}

fn bucket_from_prefix(prefix: &str) -> Option<String> {
    prefix
        .trim()
        .strip_prefix("gs://")
        .and_then(|rest| rest.split('/').next())
        .filter(|bucket| !bucket.is_empty())
        .map(str::to_string)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Uncommitted-change gate, run at most once per deploy.
#[derive(Default)]
struct WorktreeCheck {
    done: bool,
    forced: Vec<String>,
}

impl WorktreeCheck {
    fn run(&mut self, ctx: &DeployContext, options: &DeployOptions, confirm: ConfirmChanges<'_>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let git = &ctx.config().git;
        let changes: Vec<String> = ctx
            .history()
            .dirty_paths()?
            .into_iter()
            .filter(|path| !git.is_ignored(path))
            .collect();
        self.done = true;
        if changes.is_empty() {
            return Ok(());
        }

        let listing = changes
            .iter()
            .map(|c| format!("  {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        if !options.force || !confirm(&changes) {
            return Err(DeployError::UncommittedChanges { changes: listing });
        }
        tracing::warn!(count = changes.len(), "deploying with uncommitted changes");
        self.forced = changes;
        Ok(())
    }
}
