//! Deployment context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{ConfigStore, DeclpipeConfig};
use crate::error::{DeployError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::handler::HandlerRegistry;
use crate::provider::{ResourceClient, RestClient};
use crate::storage::{GcloudStorage, ObjectStore};
use crate::version::{AncestryValidator, GitHistory, VersionControl};

/// Everything a deploy talks to.
///
/// Frontends build this once with [`DeployContext::from_system`]; tests
/// assemble one from fakes with [`DeployContext::new`].
pub struct DeployContext {
    work_dir: PathBuf,
    config: DeclpipeConfig,
    runner: Arc<dyn CommandRunner>,
    store: Box<dyn ObjectStore>,
    client: Box<dyn ResourceClient>,
    history: Box<dyn VersionControl>,
    registry: HandlerRegistry,
    clock: fn() -> chrono::DateTime<chrono::Utc>,
}

impl DeployContext {
    pub fn new(
        work_dir: PathBuf,
        config: DeclpipeConfig,
        runner: Arc<dyn CommandRunner>,
        store: Box<dyn ObjectStore>,
        client: Box<dyn ResourceClient>,
        history: Box<dyn VersionControl>,
    ) -> Self {
        Self {
            work_dir,
            config,
            runner,
            store,
            client,
            history,
            registry: HandlerRegistry::default(),
            clock: chrono::Utc::now,
        }
    }

    /// Context backed by `gcloud`, the cloud REST APIs and the git
    /// repository containing `work_dir`.
    pub fn from_system(work_dir: &Path) -> Result<Self> {
        let config = ConfigStore::for_work_dir(work_dir)
            .load()
            .map_err(|e| DeployError::Config(format!("{e:#}")))?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let store = GcloudStorage::new(Arc::clone(&runner));
        let client = RestClient::new(Arc::clone(&runner))?;
        let history = GitHistory::new(work_dir);

        Ok(Self::new(
            work_dir.to_path_buf(),
            config,
            runner,
            Box::new(store),
            Box::new(client),
            Box::new(history),
        ))
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> chrono::DateTime<chrono::Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn config(&self) -> &DeclpipeConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    pub fn history(&self) -> &dyn VersionControl {
        self.history.as_ref()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn clock(&self) -> fn() -> chrono::DateTime<chrono::Utc> {
        self.clock
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        (self.clock)()
    }

    pub fn ancestry_validator(&self) -> AncestryValidator {
        AncestryValidator::new(self.config.ancestry.relaxed_environments.clone())
    }

    /// Resolve a path given relative to the working directory.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.work_dir.join(relative)
    }
}
