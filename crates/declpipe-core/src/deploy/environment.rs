//! Reconcile every resource declared for one environment.

use crate::error::{DeployError, Result};
use crate::handler::{HandlerRegistry, ResourceHandler};
use crate::model::EnvironmentModel;
use crate::provider::ResourceClient;

use super::executor::{ReconcileReport, deploy_gcp_resource};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub resources: Vec<ReconcileReport>,
    /// Names of resource profiles passed over.
    pub skipped_profiles: Vec<String>,
}

impl EnvironmentReport {
    pub fn applied_count(&self) -> usize {
        self.resources.iter().filter(|r| r.applied).count()
    }
}

pub struct EnvironmentDeployer<'a> {
    registry: &'a HandlerRegistry,
    client: &'a dyn ResourceClient,
    dry_run: bool,
}

impl<'a> EnvironmentDeployer<'a> {
    pub fn new(registry: &'a HandlerRegistry, client: &'a dyn ResourceClient, dry_run: bool) -> Self {
        Self {
            registry,
            client,
            dry_run,
        }
    }

    /// Reconcile the environment's resources in file order.
    ///
    /// Every declaration is dispatched to its handler before the first remote
    /// call, so an unsupported type fails without side effects. Any failure is
    /// wrapped with the environment and deployment-file names.
    pub fn deploy(&self, env_name: &str, file: &str, env: &EnvironmentModel) -> Result<EnvironmentReport> {
        self.run(env)
            .map_err(|e| DeployError::in_environment(e, env_name, file))
    }

    fn run(&self, env: &EnvironmentModel) -> Result<EnvironmentReport> {
        let mut report = EnvironmentReport::default();
        let mut handlers: Vec<Box<dyn ResourceHandler>> = Vec::new();

        for decl in &env.resources {
            if decl.is_profile() {
                tracing::info!(resource = %decl.name, "skipping resource profile");
                report.skipped_profiles.push(decl.name.clone());
                continue;
            }
            handlers.push(self.registry.handler_for(decl, env)?);
        }

        for handler in &handlers {
            report
                .resources
                .push(deploy_gcp_resource(handler.as_ref(), self.client, self.dry_run)?);
        }
        Ok(report)
    }
}
