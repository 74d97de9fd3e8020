//! Resource reconciliation.

pub mod environment;
pub mod executor;

pub use environment::{EnvironmentDeployer, EnvironmentReport};
pub use executor::{ReconcileOutcome, ReconcileReport, deploy_gcp_resource};
