//! Declpipe Core Library
//!
//! Declarative deployment of cloud data-pipeline infrastructure: reconciles
//! declared resources against the provider and publishes versioned pipeline
//! definitions behind a compare-and-swap manifest pointer.

pub mod artifacts;
pub mod commands;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod handler;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod storage;
pub mod version;

/// Re-exports of commonly used types
pub mod prelude {
    // Commands
    pub use crate::commands::{DeployCommand, DeployOptions, DeployReport, StageStatus};
    pub use crate::context::DeployContext;

    // Configuration
    pub use crate::config::{ConfigStore, DeclpipeConfig};

    // Errors
    pub use crate::error::{CommandError, DeployError, ProviderError, StorageError};

    // Model
    pub use crate::model::{DeploymentModel, EnvironmentModel, ResourceDeclaration};

    // Reconciliation
    pub use crate::deploy::{EnvironmentDeployer, ReconcileOutcome, ReconcileReport};
    pub use crate::handler::{HandlerRegistry, ResourceHandler};
    pub use crate::provider::ResourceClient;

    // Versioning
    pub use crate::manifest::{ManifestPublisher, ManifestRecord, PublishReport};
    pub use crate::storage::{Generation, ObjectStore, WritePrecondition, WriteResult};
    pub use crate::version::{AncestryValidator, Bypass, VersionControl, VersionId};
}
