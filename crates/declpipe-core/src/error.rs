//! Error taxonomy for deployments.
//!
//! Collaborators (provider clients, object stores, command runners) report
//! their own error enums; everything converges on [`DeployError`] before it
//! reaches the driver.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors raised by a provider client.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource does not exist. Handlers treat this as the
    /// "create" path rather than a failure.
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("{method} failed with HTTP {status}: {message}")]
    Http {
        method: String,
        status: u16,
        message: String,
    },

    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors raised by an object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload to {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("read of {path} failed: {message}")]
    Read { path: String, message: String },

    #[error("invalid object uri: {0}")]
    InvalidUri(String),
}

/// Errors raised while executing an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors surfaced by a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment \"{env}\" not found in {file}")]
    EnvironmentNotFound { env: String, file: String },

    #[error("unsupported resource type: {0}")]
    UnknownResourceType(String),

    #[error("found {count} {kind} resources matching '{identifier}'; disambiguate the declaration")]
    AmbiguousResource {
        kind: String,
        identifier: String,
        count: usize,
    },

    #[error(
        "REGRESSION BLOCKED: the remote version ({remote}) is ahead of or divergent from \
         your local version ({local}). Pull the latest changes before deploying."
    )]
    RegressionBlocked { remote: String, local: String },

    #[error(
        "failed to update manifest {path} after {attempts} attempts due to high concurrency; \
         artifacts were uploaded but the published version was not updated"
    )]
    ManifestContention { path: String, attempts: u32 },

    #[error("malformed manifest at {path}: {message}")]
    ManifestFormat { path: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("bad file: {0}")]
    BadFile(String),

    #[error("failed to build dependency bundle for python {version}: {message}")]
    Bundle { version: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("version control error: {0}")]
    VersionControl(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to deploy resources for environment '{env}' from file '{file}'")]
    ResourceDeployment {
        env: String,
        file: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("failed to deploy pipeline for environment '{env}' from file '{file}'")]
    PipelineDeployment {
        env: String,
        file: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("rollback to version {version} failed: {message}")]
    Rollback { version: String, message: String },

    #[error("uncommitted changes detected:\n{changes}\nCommit or stash them before deploying, or use --force.")]
    UncommittedChanges { changes: String },

    #[error("nothing to deploy: {0}")]
    NothingToDeploy(String),
}

impl From<git2::Error> for DeployError {
    fn from(err: git2::Error) -> Self {
        DeployError::VersionControl(err.message().to_string())
    }
}

impl DeployError {
    /// Wrap an environment-level failure with the deployment context.
    pub fn in_environment(self, env: &str, file: &str) -> Self {
        DeployError::ResourceDeployment {
            env: env.to_string(),
            file: file.to_string(),
            source: Box::new(self),
        }
    }

    /// Wrap a pipeline-stage failure with the deployment context.
    pub fn in_pipeline(self, env: &str, file: &str) -> Self {
        DeployError::PipelineDeployment {
            env: env.to_string(),
            file: file.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through environment and pipeline wrappers.
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::ResourceDeployment { source, .. }
            | DeployError::PipelineDeployment { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors that represent a lost compare-and-swap race.
    pub fn is_contention(&self) -> bool {
        matches!(self.root(), DeployError::ManifestContention { .. })
    }
}
